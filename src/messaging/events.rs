//! # Publish Event Listeners
//!
//! Fire-and-forget hooks the publisher calls around every attempt. The publisher
//! never inspects what a listener does; listeners must be cheap and must not block.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::message::PublishEvent;
use crate::error::PublisherError;

pub trait PublishEventListener: Send + Sync {
    fn before_publish(&self, _event: &PublishEvent) {}

    fn after_publish(&self, _event: &PublishEvent) {}

    fn after_confirm(&self, _event: &PublishEvent) {}

    /// The attempt failed and the message will be republished after `next_delay`
    fn after_intermediate_failure(
        &self,
        _event: &PublishEvent,
        _error: &PublisherError,
        _next_delay: Duration,
    ) {
    }

    /// The message failed terminally; the caller receives `error`
    fn after_final_failure(&self, _event: &PublishEvent, _error: &PublisherError) {}
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventListener;

impl PublishEventListener for NoopEventListener {}

/// Emits every publish event as a structured tracing record
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventListener;

impl PublishEventListener for LoggingEventListener {
    fn before_publish(&self, event: &PublishEvent) {
        debug!(
            exchange = %event.exchange,
            routing_key = %event.routing_key,
            message_id = event.properties.message_id_or_placeholder(),
            attempt = event.attempt,
            payload_bytes = event.payload.len(),
            "Publishing message"
        );
    }

    fn after_publish(&self, event: &PublishEvent) {
        let publish_millis = event
            .publish_completed_at
            .map(|done| (done - event.published_at).num_milliseconds());
        debug!(
            exchange = %event.exchange,
            routing_key = %event.routing_key,
            message_id = event.properties.message_id_or_placeholder(),
            attempt = event.attempt,
            publish_millis,
            "Message handed to channel"
        );
    }

    fn after_confirm(&self, event: &PublishEvent) {
        let total_millis = (chrono::Utc::now() - event.created_at).num_milliseconds();
        info!(
            exchange = %event.exchange,
            routing_key = %event.routing_key,
            message_id = event.properties.message_id_or_placeholder(),
            attempt = event.attempt,
            confirms_enabled = event.confirms_enabled,
            total_millis,
            "Message confirmed"
        );
    }

    fn after_intermediate_failure(
        &self,
        event: &PublishEvent,
        error: &PublisherError,
        next_delay: Duration,
    ) {
        warn!(
            exchange = %event.exchange,
            routing_key = %event.routing_key,
            message_id = event.properties.message_id_or_placeholder(),
            attempt = event.attempt,
            next_delay_millis = next_delay.as_millis() as u64,
            error = %error,
            "Publish attempt failed, retrying"
        );
    }

    fn after_final_failure(&self, event: &PublishEvent, error: &PublisherError) {
        warn!(
            exchange = %event.exchange,
            routing_key = %event.routing_key,
            message_id = event.properties.message_id_or_placeholder(),
            attempt = event.attempt,
            error = %error,
            "Publish failed permanently"
        );
    }
}
