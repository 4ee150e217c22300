//! # Testing Support
//!
//! Scripted broker doubles for exercising the publisher without a broker.
//!
//! - [`MockChannelFactory`]: hands out [`MockChannel`]s, can fail a number of
//!   creations in a row
//! - [`MockChannel`]: records publishes, fires confirms on demand (or
//!   automatically), can fail the publish at a given channel-local sequence
//! - [`RecordingEventListener`]: captures every publish event
//! - [`MockConfirmListener`]: captures raw confirm callbacks
//!
//! All doubles are cheap to clone and share their state between clones, so a
//! test can keep a handle while the publisher owns another.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PublisherError;
use crate::messaging::{
    ChannelError, ChannelFactory, ConfirmListener, Exchange, MessageProperties, Payload,
    PublishChannel, PublishEvent, PublishEventListener, RoutingKey,
};

/// One publish accepted by a [`MockChannel`]
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    /// Channel-local sequence number the publish was assigned
    pub seq_no: u64,
    pub exchange: Exchange,
    pub routing_key: RoutingKey,
    pub properties: MessageProperties,
    pub payload: Payload,
}

struct MockChannelState {
    publishes: Vec<RecordedPublish>,
    listeners: Vec<Arc<dyn ConfirmListener>>,
    fail_publish_at: Option<u64>,
    auto_ack: bool,
    wait_for_confirms_result: Result<bool, ChannelError>,
    wait_for_confirms_delay: Option<Duration>,
    wait_for_confirms_calls: usize,
}

struct MockChannelInner {
    id: usize,
    next_seq: AtomicU64,
    open: AtomicBool,
    closed: AtomicBool,
    closed_with_error: AtomicBool,
    state: Mutex<MockChannelState>,
}

/// In-memory publish channel with scripted behaviour
#[derive(Clone)]
pub struct MockChannel {
    inner: Arc<MockChannelInner>,
}

impl fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockChannel")
            .field("id", &self.inner.id)
            .field("next_seq", &self.next_publish_seq_no())
            .field("open", &self.is_open())
            .finish()
    }
}

impl MockChannel {
    pub fn new(id: usize) -> Self {
        Self {
            inner: Arc::new(MockChannelInner {
                id,
                next_seq: AtomicU64::new(1),
                open: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                closed_with_error: AtomicBool::new(false),
                state: Mutex::new(MockChannelState {
                    publishes: Vec::new(),
                    listeners: Vec::new(),
                    fail_publish_at: None,
                    auto_ack: false,
                    wait_for_confirms_result: Ok(true),
                    wait_for_confirms_delay: None,
                    wait_for_confirms_calls: 0,
                }),
            }),
        }
    }

    /// Creation order within the factory, starting at 0
    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Fail the publish that would receive channel-local sequence `seq_no`
    pub fn fail_publish_at(&self, seq_no: u64) {
        self.inner.state.lock().fail_publish_at = Some(seq_no);
    }

    /// Ack every successful publish immediately, from inside the publish call
    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.inner.state.lock().auto_ack = auto_ack;
    }

    pub fn set_open(&self, open: bool) {
        self.inner.open.store(open, Ordering::SeqCst);
    }

    pub fn set_wait_for_confirms_result(&self, result: Result<bool, ChannelError>) {
        self.inner.state.lock().wait_for_confirms_result = result;
    }

    /// Make `wait_for_confirms` take `delay` before answering
    pub fn set_wait_for_confirms_delay(&self, delay: Duration) {
        self.inner.state.lock().wait_for_confirms_delay = Some(delay);
    }

    /// Skip a sequence number as if a publish happened outside the publisher
    pub fn advance_sequence(&self) {
        self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
    }

    pub fn publishes(&self) -> Vec<RecordedPublish> {
        self.inner.state.lock().publishes.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.inner.state.lock().publishes.len()
    }

    pub fn confirm_listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    pub fn wait_for_confirms_calls(&self) -> usize {
        self.inner.state.lock().wait_for_confirms_calls
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn closed_with_error(&self) -> bool {
        self.inner.closed_with_error.load(Ordering::SeqCst)
    }

    /// Deliver a broker ack to every registered confirm listener
    pub fn ack(&self, delivery_tag: u64, multiple: bool) {
        for listener in self.listeners() {
            listener.handle_ack(delivery_tag, multiple);
        }
    }

    /// Deliver a broker nack to every registered confirm listener
    pub fn nack(&self, delivery_tag: u64, multiple: bool) {
        for listener in self.listeners() {
            listener.handle_nack(delivery_tag, multiple);
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn ConfirmListener>> {
        self.inner.state.lock().listeners.clone()
    }
}

#[async_trait]
impl PublishChannel for MockChannel {
    fn next_publish_seq_no(&self) -> u64 {
        self.inner.next_seq.load(Ordering::SeqCst)
    }

    async fn basic_publish(
        &self,
        exchange: &Exchange,
        routing_key: &RoutingKey,
        properties: &MessageProperties,
        payload: &Payload,
    ) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }

        let seq_no = self.next_publish_seq_no();
        let auto_ack = {
            let mut state = self.inner.state.lock();
            if state.fail_publish_at == Some(seq_no) {
                return Err(ChannelError::io(
                    "basic_publish",
                    format!("scripted failure at sequence {seq_no}"),
                ));
            }
            state.publishes.push(RecordedPublish {
                seq_no,
                exchange: exchange.clone(),
                routing_key: routing_key.clone(),
                properties: properties.clone(),
                payload: payload.clone(),
            });
            state.auto_ack
        };
        self.inner.next_seq.fetch_add(1, Ordering::SeqCst);

        if auto_ack {
            self.ack(seq_no, false);
        }
        Ok(())
    }

    fn add_confirm_listener(&self, listener: Arc<dyn ConfirmListener>) {
        self.inner.state.lock().listeners.push(listener);
    }

    async fn wait_for_confirms(&self, _timeout: Option<Duration>) -> Result<bool, ChannelError> {
        let (delay, result) = {
            let mut state = self.inner.state.lock();
            state.wait_for_confirms_calls += 1;
            (
                state.wait_for_confirms_delay,
                state.wait_for_confirms_result.clone(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close_with_error(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.closed_with_error.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MockFactoryState {
    channels: Vec<MockChannel>,
    creation_attempts: u32,
    failures_remaining: u32,
    auto_ack: bool,
    next_channel_fail_publish_at: Option<u64>,
}

/// Channel factory handing out [`MockChannel`]s
#[derive(Debug, Clone, Default)]
pub struct MockChannelFactory {
    state: Arc<Mutex<MockFactoryState>>,
}

impl MockChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels created from now on ack every publish immediately
    pub fn with_auto_ack(self) -> Self {
        self.state.lock().auto_ack = true;
        self
    }

    /// Fail the next `count` creation attempts with a connection error
    pub fn fail_next_creations(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    /// The next channel created fails the publish at channel-local `seq_no`
    pub fn fail_next_channel_publish_at(&self, seq_no: u64) {
        self.state.lock().next_channel_fail_publish_at = Some(seq_no);
    }

    /// Every creation attempt, successful or not
    pub fn creation_attempts(&self) -> u32 {
        self.state.lock().creation_attempts
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// The `index`th channel created
    pub fn channel(&self, index: usize) -> Option<MockChannel> {
        self.state.lock().channels.get(index).cloned()
    }

    pub fn latest_channel(&self) -> Option<MockChannel> {
        self.state.lock().channels.last().cloned()
    }
}

#[async_trait]
impl ChannelFactory for MockChannelFactory {
    async fn create_publish_channel(&self) -> Result<Arc<dyn PublishChannel>, ChannelError> {
        let mut state = self.state.lock();
        state.creation_attempts += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ChannelError::connection("scripted connection failure"));
        }

        let channel = MockChannel::new(state.channels.len());
        channel.set_auto_ack(state.auto_ack);
        if let Some(seq_no) = state.next_channel_fail_publish_at.take() {
            channel.fail_publish_at(seq_no);
        }
        state.channels.push(channel.clone());
        Ok(Arc::new(channel))
    }
}

/// Confirm listener that only records what it was told
#[derive(Debug, Default)]
pub struct MockConfirmListener {
    acks: Mutex<Vec<(u64, bool)>>,
    nacks: Mutex<Vec<(u64, bool)>>,
}

impl MockConfirmListener {
    pub fn acks(&self) -> Vec<(u64, bool)> {
        self.acks.lock().clone()
    }

    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.nacks.lock().clone()
    }
}

impl ConfirmListener for MockConfirmListener {
    fn handle_ack(&self, delivery_tag: u64, multiple: bool) {
        self.acks.lock().push((delivery_tag, multiple));
    }

    fn handle_nack(&self, delivery_tag: u64, multiple: bool) {
        self.nacks.lock().push((delivery_tag, multiple));
    }
}

/// Which listener hook produced a [`RecordedEvent`]
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    BeforePublish,
    AfterPublish,
    AfterConfirm,
    IntermediateFailure {
        error: PublisherError,
        next_delay: Duration,
    },
    FinalFailure {
        error: PublisherError,
    },
}

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: EventKind,
    pub event: PublishEvent,
}

/// Event listener that keeps every event in call order
#[derive(Debug, Clone, Default)]
pub struct RecordingEventListener {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(&e.kind)).count()
    }

    pub fn before_publish_count(&self) -> usize {
        self.count(|kind| matches!(kind, EventKind::BeforePublish))
    }

    pub fn confirm_count(&self) -> usize {
        self.count(|kind| matches!(kind, EventKind::AfterConfirm))
    }

    /// Error and retry delay of every intermediate failure
    pub fn intermediate_failures(&self) -> Vec<(PublisherError, Duration)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::IntermediateFailure { error, next_delay } => {
                    Some((error.clone(), *next_delay))
                }
                _ => None,
            })
            .collect()
    }

    pub fn final_failures(&self) -> Vec<PublisherError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::FinalFailure { error } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, kind: EventKind, event: &PublishEvent) {
        self.events.lock().push(RecordedEvent {
            kind,
            event: event.clone(),
        });
    }
}

impl PublishEventListener for RecordingEventListener {
    fn before_publish(&self, event: &PublishEvent) {
        self.record(EventKind::BeforePublish, event);
    }

    fn after_publish(&self, event: &PublishEvent) {
        self.record(EventKind::AfterPublish, event);
    }

    fn after_confirm(&self, event: &PublishEvent) {
        self.record(EventKind::AfterConfirm, event);
    }

    fn after_intermediate_failure(
        &self,
        event: &PublishEvent,
        error: &PublisherError,
        next_delay: Duration,
    ) {
        self.record(
            EventKind::IntermediateFailure {
                error: error.clone(),
                next_delay,
            },
            event,
        );
    }

    fn after_final_failure(&self, event: &PublishEvent, error: &PublisherError) {
        self.record(
            EventKind::FinalFailure {
                error: error.clone(),
            },
            event,
        );
    }
}
