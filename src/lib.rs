pub mod client;
pub mod cluster;
pub mod command;
pub mod error;
pub mod observability;

pub use client::{Arg, Connector, NodeConnection};
pub use cluster::{NodeAddress, Router, Topology};
pub use command::CommandClass;
pub use error::{Result, RouterError};
