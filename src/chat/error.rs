//! Chat protocol error types.

use std::error::Error as StdError;
use std::fmt;

/// Chat protocol errors.
#[non_exhaustive]
#[derive(Debug)]
pub enum ChatError {
    /// Frame tag outside the known event set
    UnknownEventType(String),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEventType(tag) => write!(f, "Unknown chat event type: {tag}"),
        }
    }
}

impl StdError for ChatError {}

impl From<ChatError> for crate::error::Error {
    fn from(err: ChatError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Protocol, err)
    }
}
