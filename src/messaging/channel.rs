//! # Broker Channel Seam
//!
//! The narrow capability the publisher needs from a broker client: create a
//! channel, publish on it, get told about confirms, and close it. Everything
//! below this seam (connections, framing, heartbeats) belongs to the
//! implementation.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::errors::ChannelError;
use super::message::{Exchange, MessageProperties, Payload, RoutingKey};

/// Receives broker publish confirms for one channel
///
/// Invoked from the channel's own I/O context; implementations must only hand
/// the work off and return.
pub trait ConfirmListener: Send + Sync {
    /// `delivery_tag` was confirmed; with `multiple` every earlier tag of the channel too
    fn handle_ack(&self, delivery_tag: u64, multiple: bool);

    /// `delivery_tag` was rejected; with `multiple` every earlier tag of the channel too
    fn handle_nack(&self, delivery_tag: u64, multiple: bool);
}

/// A single logical publish session
#[async_trait]
pub trait PublishChannel: Send + Sync + fmt::Debug {
    /// Delivery tag the next publish will receive; restarts at 1 for every new channel
    fn next_publish_seq_no(&self) -> u64;

    async fn basic_publish(
        &self,
        exchange: &Exchange,
        routing_key: &RoutingKey,
        properties: &MessageProperties,
        payload: &Payload,
    ) -> Result<(), ChannelError>;

    fn add_confirm_listener(&self, listener: Arc<dyn ConfirmListener>);

    /// Wait until every outstanding publish is confirmed. `Ok(false)` means a nack
    /// was seen or the timeout elapsed first.
    async fn wait_for_confirms(&self, timeout: Option<Duration>) -> Result<bool, ChannelError>;

    /// Orderly close
    async fn close(&self) -> Result<(), ChannelError>;

    /// Abnormal close after a failure; must not fail
    async fn close_with_error(&self);

    fn is_open(&self) -> bool;
}

/// Creates publish channels on demand
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn create_publish_channel(&self) -> Result<Arc<dyn PublishChannel>, ChannelError>;
}
