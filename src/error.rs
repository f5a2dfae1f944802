use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to connect to {alias} ({addr}): {reason}")]
    Connection {
        alias: String,
        addr: String,
        reason: String,
    },

    #[error("Unknown node alias: {0}")]
    UnknownAlias(String),

    #[error("Resharding error: {0}")]
    Reshard(String),

    #[error(transparent)]
    Upstream(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse topology: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RouterError {
    /// True for errors that mean the topology itself is unusable
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            RouterError::Config(_) | RouterError::Io(_) | RouterError::Toml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
