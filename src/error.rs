//! # Publisher Error Types
//!
//! Terminal and intermediate failures produced by the publisher. Every variant is
//! cheap to clone because the same error is handed to the event listener and then
//! delivered to the caller's [`PublishHandle`](crate::messaging::PublishHandle).

use thiserror::Error;

use crate::config::ConfigurationError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublisherError {
    /// No channel could be created within the configured number of attempts
    #[error("Failed to create channel after {attempts} attempts: {message}")]
    ChannelAcquisition { attempts: i32, message: String },

    /// The raw publish call failed; the channel has been declared broken
    #[error("Publish to exchange '{exchange}' failed: {message}")]
    Publish { exchange: String, message: String },

    /// The broker rejected the message with a negative confirm
    #[error("Publisher sent nack on confirm return. deliveryTag={delivery_tag}")]
    BrokerNack { delivery_tag: u64 },

    /// No confirm arrived before the confirm cache evicted the message
    #[error("Message did not receive publish confirm within {timeout_seconds}s")]
    ConfirmTimeout { timeout_seconds: u64 },

    /// The publisher was shut down before the message could be resolved
    #[error("Publisher is closed")]
    PublisherClosed,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PublisherError {
    /// Create a channel acquisition error
    pub fn channel_acquisition(attempts: i32, message: impl Into<String>) -> Self {
        Self::ChannelAcquisition {
            attempts,
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    /// Create a broker nack error
    pub fn broker_nack(delivery_tag: u64) -> Self {
        Self::BrokerNack { delivery_tag }
    }

    /// Create a confirm timeout error
    pub fn confirm_timeout(timeout_seconds: u64) -> Self {
        Self::ConfirmTimeout { timeout_seconds }
    }
}

impl From<ConfigurationError> for PublisherError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PublisherError>;
