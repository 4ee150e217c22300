//! # Messaging Module
//!
//! Confirmed publishing over a single broker channel.
//!
//! ## Components
//!
//! - [`publisher`]: [`SingleChannelPublisher`], the submission and retry orchestrator
//! - [`lifecycle`]: channel acquisition, teardown and the channel-state lock
//! - [`sequence`]: delivery tag to internal sequence number translation
//! - [`confirm_cache`]: expiring store of messages awaiting a confirm
//! - [`worker`]: serial task queues the publisher runs its work on
//! - [`channel`]: the broker collaborator traits
//! - [`events`]: publish event listener hooks
//! - `amqp`: lapin-backed channel implementation (`amqp` feature)

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod confirm_cache;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod message;
pub mod publisher;
pub mod sequence;
pub mod worker;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannelFactory, AmqpPublishChannel};
pub use channel::{ChannelFactory, ConfirmListener, PublishChannel};
pub use confirm_cache::ConfirmCache;
pub use errors::ChannelError;
pub use events::{LoggingEventListener, NoopEventListener, PublishEventListener};
pub use lifecycle::{ChannelGuard, ChannelLifecycle, ConfirmListenerFactory};
pub use message::{
    Exchange, MessageProperties, Payload, PendingMessage, PublishEvent, PublishHandle,
    PublishRequest, RoutingKey,
};
pub use publisher::{RabbitPublisher, SingleChannelPublisher};
pub use sequence::SequenceTranslator;
pub use worker::SerialWorker;
