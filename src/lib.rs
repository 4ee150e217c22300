#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Confirmed Publisher
//!
//! Resilient message publishing over a single broker channel with publish
//! confirms, automatic channel recovery and bounded or unbounded retries.
//!
//! ## Overview
//!
//! Callers submit `(exchange, routing key, properties, payload)` and get back a
//! [`PublishHandle`](messaging::PublishHandle) that resolves exactly once: `Ok(())`
//! when the broker confirmed the message, or a terminal [`PublisherError`] once
//! the retry budget is spent.
//!
//! ## Key Features
//!
//! - **Publish confirms**: every message waits for a broker ack or nack; single
//!   and cumulative confirms are both handled
//! - **Channel recovery**: a failed channel is discarded and replaced lazily,
//!   with Fibonacci backoff between creation attempts
//! - **Stable sequence numbers**: internal numbers keep increasing across
//!   channel generations, so confirms never resolve a message of an older channel
//! - **Confirm timeouts**: unconfirmed messages expire and are retried
//! - **Graceful shutdown**: bounded wait for outstanding confirms
//!
//! ## Module Organization
//!
//! - [`messaging`] - Publisher, channel lifecycle, confirm cache, workers
//! - [`resilience`] - Backoff and retry policies
//! - [`config`] - Configuration types and loading
//! - [`error`] - Publisher error type
//! - [`logging`] - Structured logging setup
//! - [`testing`] - Scripted broker doubles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use confirmed_publisher::config::ConfigLoader;
//! use confirmed_publisher::messaging::{MessageProperties, SingleChannelPublisher};
//! use confirmed_publisher::testing::MockChannelFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! confirmed_publisher::logging::init_structured_logging();
//!
//! let config = ConfigLoader::new().load()?;
//! let factory = Arc::new(MockChannelFactory::new().with_auto_ack());
//! let publisher = SingleChannelPublisher::with_logging(factory, config)?;
//!
//! let properties = MessageProperties::new().with_generated_message_id().persistent();
//! publisher.submit("orders", "orders.created", properties, "{}").await?;
//!
//! publisher.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! With the `amqp` feature enabled, `messaging::AmqpChannelFactory` connects
//! the publisher to a real broker.

pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod resilience;
pub mod testing;

pub use config::{BackoffConfig, ConfigLoader, ConfigurationError, PublisherConfig};
pub use error::{PublisherError, Result};
pub use messaging::{
    ChannelFactory, Exchange, MessageProperties, Payload, PublishChannel, PublishEventListener,
    PublishHandle, RabbitPublisher, RoutingKey, SingleChannelPublisher,
};
