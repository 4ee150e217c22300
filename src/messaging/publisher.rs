//! # Single Channel Publisher
//!
//! Publishes messages over one broker channel at a time and resolves every
//! submission exactly once: acknowledged, or failed after the retry budget is
//! spent.
//!
//! ## Architecture
//!
//! Work is split across three [`SerialWorker`]s:
//!
//! - **publish**: runs publish attempts, one at a time, under the channel-state lock
//! - **confirm**: applies broker acks/nacks and confirm-timeout evictions
//! - **cache-cleanup**: periodically sweeps the confirm cache for expired entries
//!
//! Broker confirms are delivered on the channel's own I/O context; the internal
//! confirm listener only hands them to the confirm worker. Every failure
//! (acquisition, publish, broker nack, confirm timeout) funnels into one retry
//! decision, so a message either gets another attempt after a Fibonacci backoff
//! or reaches a terminal failure.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use confirmed_publisher::config::PublisherConfig;
//! use confirmed_publisher::messaging::{MessageProperties, SingleChannelPublisher};
//! use confirmed_publisher::testing::MockChannelFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> confirmed_publisher::Result<()> {
//! let factory = Arc::new(MockChannelFactory::new().with_auto_ack());
//! let publisher = SingleChannelPublisher::with_logging(factory, PublisherConfig::default())?;
//!
//! publisher
//!     .submit("orders", "orders.created", MessageProperties::new(), "{}")
//!     .await?;
//! publisher.shutdown().await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::channel::{ChannelFactory, ConfirmListener};
use super::confirm_cache::ConfirmCache;
use super::errors::ChannelError;
use super::events::{LoggingEventListener, PublishEventListener};
use super::lifecycle::{ChannelLifecycle, ConfirmListenerFactory};
use super::message::{
    Exchange, MessageProperties, Payload, PendingMessage, PublishHandle, PublishRequest,
    RoutingKey,
};
use super::sequence::SequenceTranslator;
use super::worker::SerialWorker;
use crate::config::PublisherConfig;
use crate::error::{PublisherError, Result};
use crate::resilience::{BackoffPolicy, RetryDecision, RetryPolicy};

/// Caller-facing publish seam
#[async_trait]
pub trait RabbitPublisher: Send + Sync {
    /// Submit a message; the handle resolves once it is confirmed or has failed terminally
    fn call(
        &self,
        exchange: Exchange,
        routing_key: RoutingKey,
        properties: MessageProperties,
        payload: Payload,
    ) -> PublishHandle;

    /// Wait for outstanding confirms, close the channel, stop all work
    async fn close(&self);
}

/// Result of a single publish attempt
#[derive(Debug)]
enum AttemptOutcome {
    /// Published; the message sits in the confirm cache
    AwaitingConfirm { sequence: u64 },
    /// Published with confirms disabled
    Acknowledged(PendingMessage),
    /// The raw publish call failed and the channel was declared broken
    PublishFailed(PendingMessage, PublisherError),
    /// No channel could be obtained
    AcquisitionFailed(PendingMessage, PublisherError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfirmKind {
    Ack,
    Nack,
}

struct PublisherInner {
    publisher_id: Uuid,
    config: PublisherConfig,
    retry: RetryPolicy,
    lifecycle: ChannelLifecycle,
    /// Present only when confirms are enabled
    cache: Option<ConfirmCache>,
    listener: Arc<dyn PublishEventListener>,
    publish_worker: SerialWorker,
    confirm_worker: SerialWorker,
    cleanup_worker: SerialWorker,
    closed: AtomicBool,
}

/// Publisher with broker confirms, retries and channel recovery over a single channel
pub struct SingleChannelPublisher {
    inner: Arc<PublisherInner>,
}

impl std::fmt::Debug for SingleChannelPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleChannelPublisher")
            .field("publisher_id", &self.inner.publisher_id)
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SingleChannelPublisher {
    /// Create a publisher. Must be called within a tokio runtime.
    ///
    /// No channel is opened until the first message is published.
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        config: PublisherConfig,
        listener: Arc<dyn PublishEventListener>,
    ) -> Result<Self> {
        config.validate()?;

        let backoff = BackoffPolicy::from_config(&config.backoff);
        let retry = RetryPolicy::new(config.max_retries, backoff);

        let inner = Arc::new_cyclic(|publisher: &Weak<PublisherInner>| {
            let confirm_listener: Option<ConfirmListenerFactory> = if config.confirms_enabled {
                let publisher = publisher.clone();
                Some(Arc::new(move |generation: u64| {
                    Arc::new(InternalConfirmListener {
                        publisher: publisher.clone(),
                        generation,
                    }) as Arc<dyn ConfirmListener>
                }))
            } else {
                None
            };
            let cache = config
                .confirms_enabled
                .then(|| ConfirmCache::new(config.confirm_timeout()));

            PublisherInner {
                publisher_id: Uuid::new_v4(),
                lifecycle: ChannelLifecycle::new(
                    factory,
                    confirm_listener,
                    backoff,
                    config.max_retries,
                ),
                retry,
                cache,
                listener,
                publish_worker: SerialWorker::spawn("publish"),
                confirm_worker: SerialWorker::spawn("confirm"),
                cleanup_worker: SerialWorker::spawn("cache-cleanup"),
                closed: AtomicBool::new(false),
                config,
            }
        });

        if inner.cache.is_some() {
            let publisher = Arc::downgrade(&inner);
            inner.cleanup_worker.schedule_periodically(
                inner.config.cache_sweep_interval(),
                move || {
                    let publisher = publisher.clone();
                    Box::pin(async move {
                        if let Some(publisher) = publisher.upgrade() {
                            publisher.evict_expired();
                        }
                    })
                },
            );
        }

        info!(
            publisher_id = %inner.publisher_id,
            confirms_enabled = inner.config.confirms_enabled,
            max_retries = inner.config.max_retries,
            confirm_timeout_seconds = inner.config.confirm_timeout_seconds,
            "Publisher started"
        );

        Ok(Self { inner })
    }

    /// Create a publisher that reports every publish event through `tracing`
    pub fn with_logging(factory: Arc<dyn ChannelFactory>, config: PublisherConfig) -> Result<Self> {
        Self::new(factory, config, Arc::new(LoggingEventListener))
    }

    pub fn publisher_id(&self) -> Uuid {
        self.inner.publisher_id
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Messages published and still waiting for a broker confirm
    pub fn pending_confirms(&self) -> usize {
        self.inner.cache.as_ref().map_or(0, ConfirmCache::len)
    }

    /// Current sequence offset and high-water mark
    pub async fn sequence(&self) -> SequenceTranslator {
        self.inner.lifecycle.sequence().await
    }

    /// Submit a message for publishing
    ///
    /// The returned handle resolves exactly once. After shutdown it resolves
    /// immediately with [`PublisherError::PublisherClosed`].
    pub fn submit(
        &self,
        exchange: impl Into<Exchange>,
        routing_key: impl Into<RoutingKey>,
        properties: MessageProperties,
        payload: impl Into<Payload>,
    ) -> PublishHandle {
        if self.is_closed() {
            return PublishHandle::resolved(Err(PublisherError::PublisherClosed));
        }
        let (request, handle) = PublishRequest::new(
            exchange.into(),
            routing_key.into(),
            properties,
            payload.into(),
        );
        self.inner.schedule_publish(request, Duration::ZERO);
        handle
    }

    /// Shut down using the configured close timeout
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(self.inner.config.close_timeout())
            .await;
    }

    /// Best-effort shutdown; always returns
    ///
    /// Stops accepting publishes, waits up to `timeout` (indefinitely when
    /// `None`) for outstanding confirms on the live channel, closes it and stops
    /// every worker. Messages still unresolved afterwards fail with
    /// [`PublisherError::PublisherClosed`].
    pub async fn shutdown_with_timeout(&self, timeout: Option<Duration>) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            debug!(publisher_id = %inner.publisher_id, "Publisher already shut down");
            return;
        }
        info!(
            publisher_id = %inner.publisher_id,
            timeout_millis = timeout.map(|t| t.as_millis() as u64),
            "Shutting down publisher"
        );

        inner.lifecycle.begin_shutdown();
        inner.publish_worker.stop();

        if inner.config.confirms_enabled {
            if let Some(channel) = inner.lifecycle.current_channel().await {
                let waiting = channel.wait_for_confirms(timeout);
                let result = match timeout {
                    Some(limit) => tokio::time::timeout(limit, waiting)
                        .await
                        .unwrap_or_else(|_| {
                            Err(ChannelError::timeout(
                                "wait_for_confirms",
                                limit.as_millis() as u64,
                            ))
                        }),
                    None => waiting.await,
                };
                match result {
                    Ok(true) => info!("All publish confirms received before close"),
                    Ok(false) => warn!(
                        pending = self.pending_confirms(),
                        "Not all publish confirms received before close"
                    ),
                    Err(e) => warn!(error = %e, "Error waiting for publish confirms on close"),
                }
            }
        }

        inner.lifecycle.close().await;
        inner.confirm_worker.stop();
        inner.cleanup_worker.stop();
        inner.confirm_worker.join().await;
        inner.cleanup_worker.join().await;

        if let Some(cache) = &inner.cache {
            let abandoned = cache.drain();
            if !abandoned.is_empty() {
                warn!(
                    count = abandoned.len(),
                    "Unconfirmed messages abandoned at shutdown"
                );
            }
            for (_, message) in abandoned {
                inner.fail(message, PublisherError::PublisherClosed);
            }
        }

        info!(publisher_id = %inner.publisher_id, "Publisher shut down");
    }
}

#[async_trait]
impl RabbitPublisher for SingleChannelPublisher {
    fn call(
        &self,
        exchange: Exchange,
        routing_key: RoutingKey,
        properties: MessageProperties,
        payload: Payload,
    ) -> PublishHandle {
        self.submit(exchange, routing_key, properties, payload)
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

impl Drop for SingleChannelPublisher {
    fn drop(&mut self) {
        self.inner.lifecycle.begin_shutdown();
        self.inner.publish_worker.stop();
        self.inner.confirm_worker.stop();
        self.inner.cleanup_worker.stop();
    }
}

impl PublisherInner {
    fn confirms_enabled(&self) -> bool {
        self.config.confirms_enabled
    }

    /// Queue an attempt on the publish worker after `delay`
    fn schedule_publish(self: &Arc<Self>, request: PublishRequest, delay: Duration) {
        let created_at = Utc::now();
        let publisher = Arc::clone(self);
        let attempt = request.attempt();
        let scheduled = self.publish_worker.schedule_after(delay, async move {
            publisher.publish_attempt(request, created_at).await;
        });
        if !scheduled {
            // the request was dropped with the job; its handle sees PublisherClosed
            debug!(attempt, "Publish worker stopped, message not scheduled");
        }
    }

    async fn publish_attempt(self: Arc<Self>, request: PublishRequest, created_at: DateTime<Utc>) {
        let outcome = self
            .run_attempt(PendingMessage::new(request, created_at))
            .await;

        match outcome {
            AttemptOutcome::AwaitingConfirm { sequence } => {
                trace!(sequence, "Message awaiting publish confirm");
            }
            AttemptOutcome::Acknowledged(message) => self.ack(message),
            AttemptOutcome::PublishFailed(message, error) => self.nack(message, error),
            AttemptOutcome::AcquisitionFailed(message, PublisherError::PublisherClosed) => {
                self.fail(message, PublisherError::PublisherClosed);
            }
            AttemptOutcome::AcquisitionFailed(message, error) => {
                error!(error = %error, "Failed to obtain publish channel");
                self.nack(message, error);
            }
        }
    }

    /// Acquire, allocate, publish and cache while holding the channel-state lock
    async fn run_attempt(&self, mut message: PendingMessage) -> AttemptOutcome {
        let mut guard = self.lifecycle.lock().await;

        let channel = match guard.acquire().await {
            Ok(channel) => channel,
            Err(error) => return AttemptOutcome::AcquisitionFailed(message, error),
        };

        let sequence = guard.allocate_sequence(channel.as_ref());
        self.listener
            .before_publish(&message.event(self.confirms_enabled()));

        let request = &message.request;
        let published = channel
            .basic_publish(
                &request.exchange,
                &request.routing_key,
                &request.properties,
                &request.payload,
            )
            .await;

        match published {
            Ok(()) => {
                message.mark_published();
                self.listener
                    .after_publish(&message.event(self.confirms_enabled()));
                match &self.cache {
                    Some(cache) => {
                        cache.put(sequence, message);
                        AttemptOutcome::AwaitingConfirm { sequence }
                    }
                    None => AttemptOutcome::Acknowledged(message),
                }
            }
            Err(e) => {
                error!(
                    exchange = %request.exchange,
                    routing_key = %request.routing_key,
                    properties = ?request.properties,
                    sequence,
                    error = %e,
                    "Failed to publish message, declaring channel broken"
                );
                let error = PublisherError::publish(request.exchange.as_str(), e.to_string());
                guard.declare_broken().await;
                AttemptOutcome::PublishFailed(message, error)
            }
        }
    }

    /// Apply a broker confirm from channel `generation`; runs on the confirm worker
    async fn handle_confirm(
        self: Arc<Self>,
        generation: u64,
        delivery_tag: u64,
        multiple: bool,
        kind: ConfirmKind,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };

        let tags = {
            let guard = self.lifecycle.lock().await;
            if !guard.is_live_generation(generation) {
                // its delivery tags no longer map onto the current offset
                debug!(
                    generation,
                    live_generation = guard.generation(),
                    delivery_tag,
                    ?kind,
                    "Ignoring confirm from superseded channel"
                );
                return;
            }
            guard.confirmed_tags(delivery_tag, multiple, cache.keys())
        };
        trace!(delivery_tag, multiple, ?kind, resolved = tags.len(), "Handling confirm");

        for tag in tags {
            let Some(message) = cache.resolve(tag) else {
                trace!(sequence = tag, "Confirm for message no longer pending");
                continue;
            };
            match kind {
                ConfirmKind::Ack => self.ack(message),
                ConfirmKind::Nack => self.nack(message, PublisherError::broker_nack(delivery_tag)),
            }
        }
    }

    /// Hand every expired cache entry to the confirm worker; runs on the cleanup worker
    fn evict_expired(self: &Arc<Self>) {
        let Some(cache) = &self.cache else {
            return;
        };
        for (sequence, message) in cache.sweep(Instant::now()) {
            if self.confirm_worker.is_stopped() {
                self.fail(message, PublisherError::PublisherClosed);
                continue;
            }
            let publisher = Arc::clone(self);
            let scheduled = self.confirm_worker.schedule(async move {
                publisher.handle_expired(sequence, message);
            });
            if !scheduled {
                debug!(sequence, "Confirm worker stopped, expired message dropped");
            }
        }
    }

    fn handle_expired(self: &Arc<Self>, sequence: u64, message: PendingMessage) {
        if message.is_published() {
            warn!(
                sequence,
                message_id = message.request().properties().message_id_or_placeholder(),
                "Message did not receive publish-confirm in time"
            );
        }
        self.nack(
            message,
            PublisherError::confirm_timeout(self.config.confirm_timeout_seconds),
        );
    }

    fn ack(&self, message: PendingMessage) {
        self.listener
            .after_confirm(&message.event(self.confirms_enabled()));
        message.into_request().complete(Ok(()));
    }

    /// Retry the message if the policy allows, otherwise fail it
    ///
    /// Once shutdown has begun no retry can run, so the message fails with
    /// [`PublisherError::PublisherClosed`] instead.
    fn nack(self: &Arc<Self>, message: PendingMessage, error: PublisherError) {
        if self.closed.load(Ordering::Acquire) {
            debug!(error = %error, "Publisher shutting down, not retrying message");
            self.fail(message, PublisherError::PublisherClosed);
            return;
        }
        match self.retry.decide(message.attempt()) {
            RetryDecision::Retry {
                next_attempt,
                delay,
            } => {
                self.listener.after_intermediate_failure(
                    &message.event(self.confirms_enabled()),
                    &error,
                    delay,
                );
                let request = message.into_request().into_attempt(next_attempt);
                self.schedule_publish(request, delay);
            }
            RetryDecision::Exhausted => self.fail(message, error),
        }
    }

    fn fail(&self, message: PendingMessage, error: PublisherError) {
        self.listener
            .after_final_failure(&message.event(self.confirms_enabled()), &error);
        message.into_request().complete(Err(error));
    }
}

/// Forwards confirms of one channel generation to the confirm worker
struct InternalConfirmListener {
    publisher: Weak<PublisherInner>,
    generation: u64,
}

impl InternalConfirmListener {
    fn dispatch(&self, delivery_tag: u64, multiple: bool, kind: ConfirmKind) {
        let Some(publisher) = self.publisher.upgrade() else {
            return;
        };
        let worker_publisher = Arc::clone(&publisher);
        let generation = self.generation;
        let scheduled = publisher.confirm_worker.schedule(async move {
            worker_publisher
                .handle_confirm(generation, delivery_tag, multiple, kind)
                .await;
        });
        if !scheduled {
            debug!(delivery_tag, ?kind, "Confirm worker stopped, confirm dropped");
        }
    }
}

impl ConfirmListener for InternalConfirmListener {
    fn handle_ack(&self, delivery_tag: u64, multiple: bool) {
        self.dispatch(delivery_tag, multiple, ConfirmKind::Ack);
    }

    fn handle_nack(&self, delivery_tag: u64, multiple: bool) {
        self.dispatch(delivery_tag, multiple, ConfirmKind::Nack);
    }
}
