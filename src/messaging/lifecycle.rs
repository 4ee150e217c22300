//! # Channel Lifecycle
//!
//! Owns the single live publish channel together with the sequence translator.
//! Both sit behind one async mutex: channel acquisition, teardown, sequence
//! allocation and cumulative-confirm range computation all go through a
//! [`ChannelGuard`], so none of them can interleave.
//!
//! Holding the guard across a whole publish attempt is what makes "allocate a
//! sequence number, publish, insert into the confirm cache" atomic with respect
//! to a concurrent teardown.

use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use super::channel::{ChannelFactory, ConfirmListener, PublishChannel};
use super::sequence::SequenceTranslator;
use crate::error::PublisherError;
use crate::resilience::BackoffPolicy;

/// Builds the confirm listener for a new channel from its generation number
pub type ConfirmListenerFactory = Arc<dyn Fn(u64) -> Arc<dyn ConfirmListener> + Send + Sync>;

#[derive(Debug, Default)]
struct ChannelState {
    channel: Option<Arc<dyn PublishChannel>>,
    sequence: SequenceTranslator,
    /// Number of channels created so far
    generation: u64,
}

pub struct ChannelLifecycle {
    factory: Arc<dyn ChannelFactory>,
    confirm_listener: Option<ConfirmListenerFactory>,
    backoff: BackoffPolicy,
    max_retries: i32,
    state: Mutex<ChannelState>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for ChannelLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLifecycle")
            .field("backoff", &self.backoff)
            .field("max_retries", &self.max_retries)
            .field("confirm_listener", &self.confirm_listener.is_some())
            .finish()
    }
}

impl ChannelLifecycle {
    /// Every channel created gets a listener from `confirm_listener`, built
    /// with that channel's generation. Pass `None` when publish confirms are
    /// disabled.
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        confirm_listener: Option<ConfirmListenerFactory>,
        backoff: BackoffPolicy,
        max_retries: i32,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            factory,
            confirm_listener,
            backoff,
            max_retries,
            state: Mutex::new(ChannelState::default()),
            shutdown,
        }
    }

    /// Enter the exclusive channel-state domain
    pub async fn lock(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            lifecycle: self,
            state: self.state.lock().await,
        }
    }

    /// Interrupt any acquisition backoff in progress and refuse further waits
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// The live channel, without creating one
    pub async fn current_channel(&self) -> Option<Arc<dyn PublishChannel>> {
        self.state.lock().await.channel.clone()
    }

    /// Snapshot of the sequence translator
    pub async fn sequence(&self) -> SequenceTranslator {
        self.state.lock().await.sequence
    }

    /// Orderly close of the live channel, if any
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let channel = self.state.lock().await.channel.take();
        if let Some(channel) = channel {
            if !channel.is_open() {
                debug!("Publish channel already closed");
                return;
            }
            match channel.close().await {
                Ok(()) => info!("Publish channel closed"),
                Err(e) => warn!(error = %e, "Error when closing publish channel"),
            }
        }
    }
}

/// Exclusive access to the channel and its sequence numbers
pub struct ChannelGuard<'a> {
    lifecycle: &'a ChannelLifecycle,
    state: MutexGuard<'a, ChannelState>,
}

impl ChannelGuard<'_> {
    pub fn sequence(&self) -> &SequenceTranslator {
        &self.state.sequence
    }

    pub fn has_channel(&self) -> bool {
        self.state.channel.is_some()
    }

    /// Number of channels created so far
    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    /// Whether `generation` is the live channel, i.e. not yet declared broken or closed
    pub fn is_live_generation(&self, generation: u64) -> bool {
        self.state.channel.is_some() && self.state.generation == generation
    }

    /// Return the live channel, creating one if there is none
    ///
    /// Creation attempt `i` first sleeps the backoff delay for `i` (attempt 0 is
    /// immediate). With `max_retries > 0` the loop gives up after that many
    /// attempts; otherwise it retries until it succeeds or shutdown begins.
    #[instrument(skip(self), fields(max_retries = self.lifecycle.max_retries))]
    pub async fn acquire(&mut self) -> Result<Arc<dyn PublishChannel>, PublisherError> {
        if let Some(channel) = &self.state.channel {
            if channel.is_open() {
                return Ok(channel.clone());
            }
            warn!("Publish channel found closed, replacing it");
            self.declare_broken().await;
        }

        let lifecycle = self.lifecycle;
        let max_retries = lifecycle.max_retries;
        let mut shutdown = lifecycle.shutdown.subscribe();
        let mut last_error = String::from("no attempt made");
        let mut attempt: u32 = 0;

        while max_retries <= 0 || i64::from(attempt) < i64::from(max_retries) {
            if lifecycle.is_shutting_down() {
                return Err(PublisherError::PublisherClosed);
            }
            let delay = lifecycle.backoff.delay(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait_for(|closing| *closing) => {
                        return Err(PublisherError::PublisherClosed);
                    }
                }
            }

            info!(attempt, "Creating publish channel");
            match lifecycle.factory.create_publish_channel().await {
                Ok(channel) => {
                    let generation = self.state.generation + 1;
                    if let Some(make_listener) = &lifecycle.confirm_listener {
                        channel.add_confirm_listener(make_listener(generation));
                    }
                    self.state.generation = generation;
                    self.state.channel = Some(channel.clone());
                    info!(
                        generation = self.state.generation,
                        offset = self.state.sequence.offset(),
                        "Publish channel created"
                    );
                    return Ok(channel);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = max_retries,
                        secs_until_next_attempt = lifecycle.backoff.delay(attempt.saturating_add(1)).as_secs(),
                        error = %e,
                        "Failed to create publish channel, will try again"
                    );
                    last_error = e.to_string();
                }
            }
            attempt = attempt.saturating_add(1);
        }

        Err(PublisherError::channel_acquisition(max_retries, last_error))
    }

    /// Issue the internal sequence number for the next publish on `channel`
    pub fn allocate_sequence(&mut self, channel: &dyn PublishChannel) -> u64 {
        self.state.sequence.allocate(channel.next_publish_seq_no())
    }

    /// Discard the live channel after a failure and start a new sequence generation
    pub async fn declare_broken(&mut self) {
        if let Some(channel) = self.state.channel.take() {
            channel.close_with_error().await;
        }
        self.state.sequence.advance_offset();
        debug!(
            offset = self.state.sequence.offset(),
            "Channel declared broken, sequence offset advanced"
        );
    }

    /// Internal numbers resolved by a confirm for `delivery_tag`, see
    /// [`SequenceTranslator::confirmed_tags`]
    pub fn confirmed_tags<I>(&self, delivery_tag: u64, multiple: bool, pending_keys: I) -> Vec<u64>
    where
        I: IntoIterator<Item = u64>,
    {
        self.state
            .sequence
            .confirmed_tags(delivery_tag, multiple, pending_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChannelFactory, MockConfirmListener};
    use std::time::Duration;

    fn lifecycle(factory: &MockChannelFactory, max_retries: i32) -> ChannelLifecycle {
        let make_listener: ConfirmListenerFactory =
            Arc::new(|_generation: u64| {
            Arc::new(MockConfirmListener::default()) as Arc<dyn ConfirmListener>
        });
        ChannelLifecycle::new(
            Arc::new(factory.clone()),
            Some(make_listener),
            BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10)),
            max_retries,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reuses_live_channel() {
        let factory = MockChannelFactory::new();
        let lifecycle = lifecycle(&factory, 3);

        let mut guard = lifecycle.lock().await;
        let first = guard.acquire().await.unwrap();
        let second = guard.acquire().await.unwrap();
        assert_eq!(guard.generation(), 1);
        assert!(guard.is_live_generation(1));
        drop(guard);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created_count(), 1);
        assert_eq!(factory.channel(0).unwrap().confirm_listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_acquire_gives_up() {
        let factory = MockChannelFactory::new();
        factory.fail_next_creations(10);
        let lifecycle = lifecycle(&factory, 3);

        let started = tokio::time::Instant::now();
        let result = lifecycle.lock().await.acquire().await;

        assert!(matches!(
            result,
            Err(PublisherError::ChannelAcquisition { attempts: 3, .. })
        ));
        assert_eq!(factory.creation_attempts(), 3);
        // fib delays 0 + 1 + 1 seconds
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_acquire_retries_until_success() {
        let factory = MockChannelFactory::new();
        factory.fail_next_creations(6);
        let lifecycle = lifecycle(&factory, 0);

        let channel = lifecycle.lock().await.acquire().await;
        assert!(channel.is_ok());
        assert_eq!(factory.creation_attempts(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_acquire_backoff() {
        let factory = MockChannelFactory::new();
        factory.fail_next_creations(u32::MAX);
        let lifecycle = Arc::new(lifecycle(&factory, 0));

        let acquiring = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.lock().await.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_secs(30)).await;
        lifecycle.begin_shutdown();

        assert_eq!(
            acquiring.await.unwrap(),
            Err(PublisherError::PublisherClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_declare_broken_closes_and_advances_offset() {
        let factory = MockChannelFactory::new();
        let lifecycle = lifecycle(&factory, 3);

        let mut guard = lifecycle.lock().await;
        let channel = guard.acquire().await.unwrap();
        for _ in 0..5 {
            guard.allocate_sequence(channel.as_ref());
            factory.channel(0).unwrap().advance_sequence();
        }
        guard.declare_broken().await;
        assert!(!guard.has_channel());
        assert!(!guard.is_live_generation(1));
        assert_eq!(guard.sequence().offset(), 5);

        let replacement = guard.acquire().await.unwrap();
        assert_eq!(guard.allocate_sequence(replacement.as_ref()), 6);
        assert!(guard.is_live_generation(2));
        assert!(!guard.is_live_generation(1));
        drop(guard);

        assert!(factory.channel(0).unwrap().closed_with_error());
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_is_replaced_on_acquire() {
        let factory = MockChannelFactory::new();
        let lifecycle = lifecycle(&factory, 3);

        lifecycle.lock().await.acquire().await.unwrap();
        factory.channel(0).unwrap().set_open(false);

        lifecycle.lock().await.acquire().await.unwrap();
        assert_eq!(factory.created_count(), 2);
    }
}
