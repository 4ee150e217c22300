//! # AMQP Channel Adapter
//!
//! [`ChannelFactory`] and [`PublishChannel`] implementations on top of `lapin`.
//!
//! The factory keeps one connection and opens it lazily, reconnecting when it is
//! found disconnected. Every channel it creates is put into confirm mode.
//! `lapin` hands back one confirmation future per publish. Each channel owns a
//! forwarding task that awaits those futures in publish order and reports each
//! to the confirm listeners as a single (non-cumulative) ack or nack for that
//! publish's delivery tag.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::{Confirmation, PublisherConfirm};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::channel::{ChannelFactory, ConfirmListener, PublishChannel};
use super::errors::ChannelError;
use super::message::{Exchange, MessageProperties, Payload, RoutingKey};

/// AMQP reply code for an orderly close
const REPLY_SUCCESS: u16 = 200;
/// AMQP reply code used when abandoning a failed channel
const REPLY_INTERNAL_ERROR: u16 = 541;

/// Opens confirm-mode channels on a lazily established connection
pub struct AmqpChannelFactory {
    uri: String,
    connection_name: String,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl std::fmt::Debug for AmqpChannelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpChannelFactory")
            .field("connection_name", &self.connection_name)
            .finish()
    }
}

impl AmqpChannelFactory {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connection_name: "confirmed-publisher".to_string(),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    /// Connection name shown in the broker management UI
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    async fn open_channel(&self) -> Result<Channel, ChannelError> {
        let mut connection = self.connection.lock().await;

        let usable = connection
            .as_ref()
            .is_some_and(|conn| conn.status().connected());
        if !usable {
            info!(connection_name = %self.connection_name, "Opening AMQP connection");
            let opened = Connection::connect(
                &self.uri,
                ConnectionProperties::default()
                    .with_connection_name(self.connection_name.clone().into()),
            )
            .await
            .map_err(|e| ChannelError::connection(format!("AMQP connection failed: {e}")))?;
            *connection = Some(opened);
        }

        match connection.as_ref() {
            Some(conn) => Ok(conn.create_channel().await?),
            None => Err(ChannelError::Closed),
        }
    }
}

#[async_trait]
impl ChannelFactory for AmqpChannelFactory {
    async fn create_publish_channel(&self) -> Result<Arc<dyn PublishChannel>, ChannelError> {
        let channel = self.open_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        debug!(channel_id = channel.id(), "AMQP channel in confirm mode");
        Ok(Arc::new(AmqpPublishChannel::new(channel)))
    }
}

type Listeners = Arc<Mutex<Vec<Arc<dyn ConfirmListener>>>>;

/// A confirm-mode `lapin` channel
pub struct AmqpPublishChannel {
    channel: Channel,
    next_seq: AtomicU64,
    listeners: Listeners,
    confirms: mpsc::UnboundedSender<(u64, PublisherConfirm)>,
}

impl std::fmt::Debug for AmqpPublishChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpPublishChannel")
            .field("channel_id", &self.channel.id())
            .field("next_seq", &self.next_seq.load(Ordering::Relaxed))
            .finish()
    }
}

impl AmqpPublishChannel {
    /// Must be called within a tokio runtime
    pub fn new(channel: Channel) -> Self {
        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));
        let (confirms, pending) = mpsc::unbounded_channel();
        tokio::spawn(forward_confirms(pending, Arc::clone(&listeners)));
        Self {
            channel,
            next_seq: AtomicU64::new(1),
            listeners,
            confirms,
        }
    }
}

/// Await publish confirmations in publish order and hand each to the listeners.
/// Ends once the channel is dropped and every queued confirmation is settled.
async fn forward_confirms<C>(mut pending: mpsc::UnboundedReceiver<(u64, C)>, listeners: Listeners)
where
    C: Future<Output = lapin::Result<Confirmation>>,
{
    while let Some((delivery_tag, confirm)) = pending.recv().await {
        let acked = match confirm.await {
            Ok(Confirmation::Nack(_)) => false,
            Ok(_) => true,
            Err(e) => {
                // the channel went away; the confirm cache times the message out
                debug!(delivery_tag, error = %e, "Publish confirmation lost");
                continue;
            }
        };
        let listeners = listeners.lock().clone();
        for listener in listeners {
            if acked {
                listener.handle_ack(delivery_tag, false);
            } else {
                listener.handle_nack(delivery_tag, false);
            }
        }
    }
}

#[async_trait]
impl PublishChannel for AmqpPublishChannel {
    fn next_publish_seq_no(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    async fn basic_publish(
        &self,
        exchange: &Exchange,
        routing_key: &RoutingKey,
        properties: &MessageProperties,
        payload: &Payload,
    ) -> Result<(), ChannelError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange.as_str(),
                routing_key.as_str(),
                BasicPublishOptions::default(),
                payload.as_bytes(),
                basic_properties(properties),
            )
            .await?;
        let delivery_tag = self.next_seq.fetch_add(1, Ordering::SeqCst);
        if self.confirms.send((delivery_tag, confirm)).is_err() {
            warn!(delivery_tag, "Confirm forwarder gone, confirmation dropped");
        }
        Ok(())
    }

    fn add_confirm_listener(&self, listener: Arc<dyn ConfirmListener>) {
        self.listeners.lock().push(listener);
    }

    async fn wait_for_confirms(&self, timeout: Option<Duration>) -> Result<bool, ChannelError> {
        let waiting = self.channel.wait_for_confirms();
        let returned = match timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(result) => result?,
                Err(_) => return Ok(false),
            },
            None => waiting.await?,
        };
        if !returned.is_empty() {
            warn!(count = returned.len(), "Unroutable messages returned by broker");
        }
        Ok(true)
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.channel.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }

    async fn close_with_error(&self) {
        if let Err(e) = self
            .channel
            .close(REPLY_INTERNAL_ERROR, "publish failure")
            .await
        {
            debug!(error = %e, "Ignoring error while abandoning AMQP channel");
        }
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

fn basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut amqp = BasicProperties::default();
    if let Some(message_id) = &properties.message_id {
        amqp = amqp.with_message_id(ShortString::from(message_id.clone()));
    }
    if let Some(correlation_id) = &properties.correlation_id {
        amqp = amqp.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(content_type) = &properties.content_type {
        amqp = amqp.with_content_type(ShortString::from(content_type.clone()));
    }
    if let Some(delivery_mode) = properties.delivery_mode {
        amqp = amqp.with_delivery_mode(delivery_mode);
    }
    if let Some(priority) = properties.priority {
        amqp = amqp.with_priority(priority);
    }
    if !properties.headers.is_empty() {
        let mut headers = FieldTable::default();
        for (key, value) in &properties.headers {
            headers.insert(ShortString::from(key.clone()), header_value(value));
        }
        amqp = amqp.with_headers(headers);
    }
    amqp
}

fn header_value(value: &serde_json::Value) -> AMQPValue {
    match value {
        serde_json::Value::Bool(flag) => AMQPValue::Boolean(*flag),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(integer) => AMQPValue::LongLongInt(integer),
            None => AMQPValue::Double(number.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(text) => AMQPValue::LongString(LongString::from(text.clone())),
        other => AMQPValue::LongString(LongString::from(other.to_string())),
    }
}
