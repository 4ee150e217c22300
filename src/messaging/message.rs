//! # Publish Message Types
//!
//! Typed wrappers for what a caller publishes, plus the bookkeeping the publisher
//! attaches to each attempt while it waits for a broker confirm.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{PublisherError, Result};

/// Name of the exchange a message is published to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Exchange(String);

impl Exchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Exchange {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Exchange {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Routing key used by the exchange to pick target queues
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoutingKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Immutable message body, shared between retry attempts without copying
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(data.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.len()).finish()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::from(value.as_bytes())
    }
}

/// Message properties carried opaquely to the channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// Application message id, used to correlate log records
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    /// 1 = transient, 2 = persistent
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    #[serde(default)]
    pub headers: BTreeMap<String, serde_json::Value>,
}

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Assign a random v4 UUID as message id
    pub fn with_generated_message_id(self) -> Self {
        self.with_message_id(Uuid::new_v4().to_string())
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_delivery_mode(mut self, delivery_mode: u8) -> Self {
        self.delivery_mode = Some(delivery_mode);
        self
    }

    pub fn persistent(self) -> Self {
        self.with_delivery_mode(2)
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Message id for log fields, `"-"` when unset
    pub fn message_id_or_placeholder(&self) -> &str {
        self.message_id.as_deref().unwrap_or("-")
    }
}

type CompletionSender = oneshot::Sender<Result<()>>;

/// A caller's publish request travelling through attempts
///
/// Everything but `attempt` is fixed at submission; the completion sender is
/// consumed by the single terminal resolution.
#[derive(Debug)]
pub struct PublishRequest {
    pub(crate) exchange: Exchange,
    pub(crate) routing_key: RoutingKey,
    pub(crate) properties: MessageProperties,
    pub(crate) payload: Payload,
    pub(crate) attempt: u32,
    completion: CompletionSender,
}

impl PublishRequest {
    pub(crate) fn new(
        exchange: Exchange,
        routing_key: RoutingKey,
        properties: MessageProperties,
        payload: Payload,
    ) -> (Self, PublishHandle) {
        let (completion, receiver) = oneshot::channel();
        let request = Self {
            exchange,
            routing_key,
            properties,
            payload,
            attempt: 1,
            completion,
        };
        (request, PublishHandle { receiver })
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    pub(crate) fn into_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Deliver the terminal outcome to the caller
    pub(crate) fn complete(self, result: Result<()>) {
        // the caller may have dropped its handle; nothing left to notify then
        let _ = self.completion.send(result);
    }
}

/// A publish attempt awaiting resolution
#[derive(Debug)]
pub struct PendingMessage {
    pub(crate) request: PublishRequest,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) published_at: DateTime<Utc>,
    pub(crate) publish_completed_at: Option<DateTime<Utc>>,
    pub(crate) published: bool,
}

impl PendingMessage {
    pub(crate) fn new(request: PublishRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            request,
            created_at,
            published_at: Utc::now(),
            publish_completed_at: None,
            published: false,
        }
    }

    /// Record that the raw channel accepted the publish call
    pub(crate) fn mark_published(&mut self) {
        self.publish_completed_at = Some(Utc::now());
        self.published = true;
    }

    pub fn attempt(&self) -> u32 {
        self.request.attempt
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn request(&self) -> &PublishRequest {
        &self.request
    }

    pub(crate) fn into_request(self) -> PublishRequest {
        self.request
    }

    pub(crate) fn event(&self, confirms_enabled: bool) -> PublishEvent {
        PublishEvent {
            exchange: self.request.exchange.clone(),
            routing_key: self.request.routing_key.clone(),
            properties: self.request.properties.clone(),
            payload: self.request.payload.clone(),
            attempt: self.request.attempt,
            confirms_enabled,
            created_at: self.created_at,
            published_at: self.published_at,
            publish_completed_at: self.publish_completed_at,
        }
    }
}

/// Snapshot handed to a [`PublishEventListener`](super::PublishEventListener)
#[derive(Debug, Clone, Serialize)]
pub struct PublishEvent {
    pub exchange: Exchange,
    pub routing_key: RoutingKey,
    pub properties: MessageProperties,
    pub payload: Payload,
    pub attempt: u32,
    pub confirms_enabled: bool,
    /// When the attempt was scheduled
    pub created_at: DateTime<Utc>,
    /// When the attempt started executing on the publish worker
    pub published_at: DateTime<Utc>,
    /// When the raw publish call returned, if it did
    pub publish_completed_at: Option<DateTime<Utc>>,
}

/// Resolves exactly once with the terminal outcome of a submitted message
///
/// If the publisher shuts down before the message is resolved the handle
/// yields [`PublisherError::PublisherClosed`].
#[derive(Debug)]
#[must_use = "a publish handle does nothing unless awaited"]
pub struct PublishHandle {
    receiver: oneshot::Receiver<Result<()>>,
}

impl PublishHandle {
    /// A handle that is already resolved, used when the publisher rejects a submission
    pub(crate) fn resolved(result: Result<()>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }
}

impl Future for PublishHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PublisherError::PublisherClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> (PublishRequest, PublishHandle) {
        PublishRequest::new(
            Exchange::new("orders"),
            RoutingKey::new("orders.created"),
            MessageProperties::new().with_message_id("m-1"),
            Payload::from("hello"),
        )
    }

    #[tokio::test]
    async fn test_handle_resolves_with_completion() {
        let (request, handle) = request();
        assert_eq!(request.attempt(), 1);
        request.complete(Ok(()));
        assert_eq!(handle.await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_request_resolves_closed() {
        let (request, handle) = request();
        drop(request);
        assert_eq!(handle.await, Err(PublisherError::PublisherClosed));
    }

    #[test]
    fn test_pending_message_event_snapshot() {
        let (request, _handle) = request();
        let mut pending = PendingMessage::new(request.into_attempt(3), Utc::now());
        assert!(!pending.is_published());
        assert!(pending.event(true).publish_completed_at.is_none());

        pending.mark_published();
        let event = pending.event(true);
        assert!(pending.is_published());
        assert_eq!(event.attempt, 3);
        assert!(event.confirms_enabled);
        assert_eq!(event.exchange.as_str(), "orders");
        assert!(event.publish_completed_at.is_some());
    }

    #[test]
    fn test_properties_builder() {
        let props = MessageProperties::new()
            .with_generated_message_id()
            .persistent()
            .with_header("tenant", "acme");
        assert!(props.message_id.is_some());
        assert_eq!(props.delivery_mode, Some(2));
        assert_eq!(props.headers["tenant"], serde_json::json!("acme"));
        assert_eq!(MessageProperties::new().message_id_or_placeholder(), "-");
    }
}
