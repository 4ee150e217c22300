//! # Channel Error Types
//!
//! Failures reported by the broker-facing collaborators ([`ChannelFactory`] and
//! [`PublishChannel`]). The publisher never surfaces these directly; it folds them
//! into [`PublisherError`](crate::error::PublisherError) outcomes.
//!
//! [`ChannelFactory`]: super::ChannelFactory
//! [`PublishChannel`]: super::PublishChannel

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Channel is closed")]
    Closed,

    #[error("Channel I/O error: {operation}: {message}")]
    Io { operation: String, message: String },

    #[error("Channel operation {operation} timed out after {timeout_millis}ms")]
    Timeout {
        operation: String,
        timeout_millis: u64,
    },
}

impl ChannelError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an I/O error for a channel operation
    pub fn io(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_millis,
        }
    }
}

#[cfg(feature = "amqp")]
impl From<lapin::Error> for ChannelError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
                ChannelError::Closed
            }
            other => ChannelError::connection(other.to_string()),
        }
    }
}
