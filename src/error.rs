// Terminal transfer errors, stored once and surfaced to every reader.

use std::io;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Malformed or contradictory range framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("range request timed out: {0}")]
    Timeout(String),

    /// The local buffer rejected a write or read.
    #[error("local buffer error: {0}")]
    Buffer(String),
}

impl StreamError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn buffer(err: io::Error) -> Self {
        Self::Buffer(err.to_string())
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Protocol(_) => io::ErrorKind::InvalidData,
            StreamError::Timeout(_) => io::ErrorKind::TimedOut,
            StreamError::Transport(_) | StreamError::Buffer(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
