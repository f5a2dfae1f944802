//! Positional argument values passed through the router

use redis::{RedisWrite, ToRedisArgs};
use std::borrow::Cow;
use std::fmt;

/// One positional argument of an operation.
///
/// `Tagged` implements the key-tag convention: when it is the first argument
/// of a call, `tag` is hashed to choose the shard and `arg` is what the store
/// receives. Anywhere else only `arg` is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Tagged { tag: String, arg: Box<Arg> },
}

impl Arg {
    /// Build a key-tagged argument
    pub fn tagged(tag: impl Into<String>, arg: impl Into<Arg>) -> Self {
        Arg::Tagged {
            tag: tag.into(),
            arg: Box::new(arg.into()),
        }
    }

    /// Bytes this argument contributes to the shard hash
    pub fn hash_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Arg::Str(s) => Cow::Borrowed(s.as_bytes()),
            Arg::Bytes(b) => Cow::Borrowed(b),
            Arg::Int(i) => Cow::Owned(i.to_string().into_bytes()),
            Arg::Float(f) => Cow::Owned(f.to_string().into_bytes()),
            Arg::Tagged { tag, .. } => Cow::Borrowed(tag.as_bytes()),
        }
    }

    /// Split a tagged argument into `(tag, arg)`; other values come back as `Err`
    pub fn into_tag(self) -> std::result::Result<(String, Arg), Arg> {
        match self {
            Arg::Tagged { tag, arg } => Ok((tag, *arg)),
            other => Err(other),
        }
    }
}

impl ToRedisArgs for Arg {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        match self {
            Arg::Str(s) => out.write_arg(s.as_bytes()),
            Arg::Bytes(b) => out.write_arg(b),
            Arg::Int(i) => out.write_arg(i.to_string().as_bytes()),
            Arg::Float(f) => out.write_arg(f.to_string().as_bytes()),
            Arg::Tagged { arg, .. } => arg.write_redis_args(out),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Str(s) => write!(f, "{:?}", s),
            Arg::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Arg::Int(i) => write!(f, "{}", i),
            Arg::Float(v) => write!(f, "{}", v),
            Arg::Tagged { tag, arg } => write!(f, "{{{}}}{}", tag, arg),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(b)
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Arg::Bytes(b.to_vec())
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self {
        Arg::Int(i)
    }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Self {
        Arg::Int(i64::from(i))
    }
}

impl From<f64> for Arg {
    fn from(f: f64) -> Self {
        Arg::Float(f)
    }
}
