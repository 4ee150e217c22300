//! Shared helpers for publisher integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use confirmed_publisher::config::{BackoffConfig, PublisherConfig};
use confirmed_publisher::messaging::{MessageProperties, PublishHandle, SingleChannelPublisher};
use confirmed_publisher::testing::{MockChannelFactory, RecordingEventListener};

/// Confirms on, three attempts, one second backoff unit
pub fn test_config() -> PublisherConfig {
    PublisherConfig::default()
        .with_max_retries(3)
        .with_confirm_timeout_seconds(30)
        .with_cache_sweep_interval_seconds(1)
        .with_backoff(BackoffConfig {
            base_delay_millis: 1_000,
            max_delay_millis: 10_000,
        })
}

pub fn start_publisher(
    factory: &MockChannelFactory,
    config: PublisherConfig,
) -> (SingleChannelPublisher, RecordingEventListener) {
    let events = RecordingEventListener::new();
    let publisher =
        SingleChannelPublisher::new(Arc::new(factory.clone()), config, Arc::new(events.clone()))
            .expect("valid publisher config");
    (publisher, events)
}

pub fn properties(index: usize) -> MessageProperties {
    MessageProperties::new()
        .with_message_id(format!("msg-{index}"))
        .with_content_type("application/json")
}

/// Submit `count` messages with ids `msg-0..msg-{count-1}`
pub fn submit_many(publisher: &SingleChannelPublisher, count: usize) -> Vec<PublishHandle> {
    (0..count)
        .map(|i| {
            publisher.submit(
                "orders",
                "orders.created",
                properties(i),
                format!("{{\"order\":{i}}}").into_bytes(),
            )
        })
        .collect()
}

/// Poll `condition` every 10ms of (usually paused) tokio time until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not reached in time");
}
