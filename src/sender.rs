// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Outbound Operation Bridge
//!
//! The [`Sender`] turns lapin's command futures into plain sequential calls:
//! every declare, bind, unbind and delete suspends until the broker's single
//! reply arrives, and publishing suspends until the batch is accepted.
//!
//! The intricate part is publishing with confirmations. The broker resolves
//! confirmations asynchronously and not necessarily in submission order, so
//! the bridge keeps a pending table keyed by a publish sequence number that
//! mirrors the channel's publish order, and removes each entry exactly once
//! when its confirmation resolves. The table is bounded by the number of
//! unconfirmed messages in flight.

use crate::{
    errors::AmqpError,
    exchange::{Exchange, ExchangeBuilder, ExchangeKind},
    message::{OutboundMessage, OutboundMessageResult},
    otel,
    plugin::PluginRegistry,
    queue::{Queue, QueueBuilder},
};
use futures_util::{Stream, StreamExt};
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeBindOptions, ExchangeDeleteOptions,
        ExchangeUnbindOptions, QueueBindOptions, QueueDeleteOptions,
    },
    protocol::constants::REPLY_SUCCESS,
    publisher_confirm::PublisherConfirm,
    types::{FieldTable, ShortString},
    BasicProperties, Channel,
};
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

/// A single-pass, non-restartable sequence of publisher confirmations.
pub type ConfirmStream =
    Pin<Box<dyn Stream<Item = Result<OutboundMessageResult, AmqpError>> + Send>>;

/// Pending-confirmation table.
///
/// Sequence numbers are assigned in publish order, matching the channel's
/// confirm sequence; every entry is removed exactly once, when its
/// confirmation resolves.
#[derive(Debug, Default)]
pub(crate) struct ConfirmLedger {
    next_seq: AtomicU64,
    pending: Mutex<HashMap<u64, OutboundMessage>>,
}

impl ConfirmLedger {
    fn register(&self, message: OutboundMessage) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().unwrap().insert(seq, message);
        seq
    }

    fn resolve(&self, seq: u64) -> Option<OutboundMessage> {
        self.pending.lock().unwrap().remove(&seq)
    }

    fn discard(&self, seq: u64) {
        self.pending.lock().unwrap().remove(&seq);
    }

    fn in_flight(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Outbound bridge bound to one channel of the shared connection.
///
/// Cloning is cheap and clones share the channel and the pending table; use
/// the client to create an independent bridge on its own channel instead.
#[derive(Debug, Clone)]
pub struct Sender {
    channel: Arc<Channel>,
    plugins: Arc<PluginRegistry>,
    ledger: Arc<ConfirmLedger>,
    confirms_enabled: Arc<AtomicBool>,
}

impl Sender {
    pub(crate) fn new(channel: Arc<Channel>, plugins: Arc<PluginRegistry>) -> Self {
        Sender {
            channel,
            plugins,
            ledger: Arc::new(ConfirmLedger::default()),
            confirms_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Declares an exchange and returns a handle to it.
    ///
    /// The `configure` closure is applied to a default [`ExchangeBuilder`]
    /// exactly once, before the request is issued.
    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        configure: impl FnOnce(&mut ExchangeBuilder),
    ) -> Result<Exchange, AmqpError> {
        let mut builder = ExchangeBuilder::default();
        configure(&mut builder);

        debug!(exchange = name, "declaring exchange");

        self.channel
            .exchange_declare(
                name,
                kind.clone().into(),
                builder.declare_options(),
                FieldTable::from(builder.arguments),
            )
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    exchange = name,
                    "error to declare the exchange"
                );
                AmqpError::from_lapin("exchange.declare", err)
            })?;

        debug!(exchange = name, "exchange declared");

        Ok(Exchange::new(name.to_owned(), kind, self.clone()))
    }

    /// Declares a queue and returns a handle to it.
    ///
    /// The handle carries the name reported by the broker, which differs from
    /// `name` when an empty name was requested and the broker generated one.
    pub async fn declare_queue(
        &self,
        name: &str,
        configure: impl FnOnce(&mut QueueBuilder),
    ) -> Result<Queue, AmqpError> {
        let mut builder = QueueBuilder::default();
        configure(&mut builder);

        debug!(queue = name, "declaring queue");

        let reply = self
            .channel
            .queue_declare(
                name,
                builder.declare_options(),
                FieldTable::from(builder.arguments),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), queue = name, "error to declare the queue");
                AmqpError::from_lapin("queue.declare", err)
            })?;

        debug!(queue = reply.name().as_str(), "queue declared");

        Ok(Queue::new(reply.name().as_str().to_owned(), self.clone()))
    }

    /// Binds `source` to the exchange `destination`.
    pub async fn bind_exchange(
        &self,
        source: &str,
        routing_key: &str,
        destination: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding exchange: {} to the exchange: {} with the key: {}",
            source, destination, routing_key
        );

        self.channel
            .exchange_bind(
                destination,
                source,
                routing_key,
                ExchangeBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind exchange to exchange");
                AmqpError::from_lapin("exchange.bind", err)
            })
    }

    /// Binds the queue `queue` to the exchange `exchange`.
    pub async fn bind_queue(
        &self,
        exchange: &str,
        routing_key: &str,
        queue: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::from_lapin("queue.bind", err)
            })
    }

    /// Removes an exchange-to-exchange binding.
    ///
    /// Unbinding a binding that does not exist is accepted by the broker.
    pub async fn unbind_exchange(
        &self,
        source: &str,
        routing_key: &str,
        destination: &str,
    ) -> Result<(), AmqpError> {
        self.channel
            .exchange_unbind(
                destination,
                source,
                routing_key,
                ExchangeUnbindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to unbind exchange from exchange");
                AmqpError::from_lapin("exchange.unbind", err)
            })
    }

    /// Removes an exchange-to-queue binding.
    ///
    /// Unbinding a binding that does not exist is accepted by the broker.
    pub async fn unbind_queue(
        &self,
        exchange: &str,
        routing_key: &str,
        queue: &str,
    ) -> Result<(), AmqpError> {
        self.channel
            .queue_unbind(queue, exchange, routing_key, FieldTable::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to unbind queue from exchange");
                AmqpError::from_lapin("queue.unbind", err)
            })
    }

    /// Deletes an exchange.
    ///
    /// With `if_unused` set, the broker rejects the deletion while bindings
    /// still reference the exchange; that rejection surfaces as a
    /// [`AmqpError::BrokerError`].
    pub async fn delete_exchange(&self, name: &str, if_unused: bool) -> Result<(), AmqpError> {
        debug!(exchange = name, "deleting exchange");

        self.channel
            .exchange_delete(
                name,
                ExchangeDeleteOptions {
                    if_unused,
                    nowait: false,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), exchange = name, "error to delete the exchange");
                AmqpError::from_lapin("exchange.delete", err)
            })
    }

    /// Deletes a queue.
    pub async fn delete_queue(
        &self,
        name: &str,
        if_unused: bool,
        if_empty: bool,
    ) -> Result<(), AmqpError> {
        debug!(queue = name, "deleting queue");

        self.channel
            .queue_delete(
                name,
                QueueDeleteOptions {
                    if_unused,
                    if_empty,
                    nowait: false,
                },
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), queue = name, "error to delete the queue");
                AmqpError::from_lapin("queue.delete", err)
            })
    }

    /// Publishes a batch of messages, fire and forget.
    ///
    /// Suspends until every message has been accepted by the channel; no
    /// routing or persistence confirmation is requested. The first failure
    /// terminates the batch with a single error; messages already handed to
    /// the broker at that point stay sent.
    pub async fn send(&self, messages: Vec<OutboundMessage>) -> Result<(), AmqpError> {
        for message in &messages {
            // confirms were not requested, the returned promise is inert
            let _ = self.publish_raw(message).await?;
        }

        Ok(())
    }

    /// Publishes a batch of messages and suspends until every one of them is
    /// confirmed or rejected by the broker.
    ///
    /// `on_result` is invoked once per submitted message, in resolution
    /// order, which may differ from submission order. When the transport
    /// fails mid-batch, every result resolved before the failure still
    /// reaches `on_result` before the error is returned.
    pub async fn send_and_confirm<F>(
        &self,
        messages: Vec<OutboundMessage>,
        mut on_result: F,
    ) -> Result<(), AmqpError>
    where
        F: FnMut(OutboundMessageResult),
    {
        let mut results = self.send_and_confirm_stream(messages).await?;

        while let Some(item) = results.next().await {
            on_result(item?);
        }

        Ok(())
    }

    /// Publishes a batch of messages and returns the confirmations as a lazy,
    /// single-pass stream the caller drives.
    ///
    /// Exactly one result is produced per submitted message. Dropping the
    /// stream abandons the remaining confirmations without affecting the
    /// broker-side state of the publishes.
    pub async fn send_and_confirm_stream(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> Result<ConfirmStream, AmqpError> {
        self.enable_confirms().await?;

        let (tx, rx) = mpsc::channel::<Result<OutboundMessageResult, AmqpError>>(1);

        for message in messages {
            let seq = self.ledger.register(message.clone());

            let confirm = match self.publish_raw(&message).await {
                Ok(confirm) => confirm,
                Err(err) => {
                    self.ledger.discard(seq);
                    return Err(err);
                }
            };

            let ledger = self.ledger.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = confirm.await;

                let Some(message) = ledger.resolve(seq) else {
                    return;
                };

                let item = match outcome {
                    Ok(confirmation) => Ok(OutboundMessageResult::new(message, confirmation)),
                    Err(err) => Err(AmqpError::from_lapin("publisher confirm", err)),
                };

                let _ = tx.send(item).await;
            });
        }

        drop(tx);

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }

    /// The number of publishes still awaiting a confirmation.
    pub fn pending_confirmations(&self) -> usize {
        self.ledger.in_flight()
    }

    /// Escape hatch: the raw lapin channel underneath this bridge.
    pub fn as_channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Closes the underlying channel.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "closing sender")
            .await
            .map_err(|err| AmqpError::from_lapin("channel.close", err))
    }

    async fn enable_confirms(&self) -> Result<(), AmqpError> {
        if self.confirms_enabled.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to enable publisher confirms");
                AmqpError::from_lapin("confirm.select", err)
            })?;

        self.confirms_enabled.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn publish_raw(&self, message: &OutboundMessage) -> Result<PublisherConfirm, AmqpError> {
        let mut headers = message.headers().clone();
        otel::inject_current_context(&mut headers);

        let mut properties = BasicProperties::default()
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(FieldTable::from(headers));

        if let Some(content_type) = message.content_type() {
            properties = properties.with_content_type(ShortString::from(content_type.to_owned()));
        }

        self.channel
            .basic_publish(
                message.exchange(),
                message.routing_key(),
                BasicPublishOptions::default(),
                message.payload(),
                properties,
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error publishing message");
                AmqpError::from_lapin("basic.publish", err)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(tag: &str) -> OutboundMessage {
        OutboundMessage::new("orders", tag, tag.as_bytes().to_vec())
    }

    #[test]
    fn ledger_resolves_out_of_order_without_mixing_messages() {
        let ledger = ConfirmLedger::default();

        let first = ledger.register(message("first"));
        let second = ledger.register(message("second"));
        let third = ledger.register(message("third"));

        assert_eq!(ledger.in_flight(), 3);

        assert_eq!(ledger.resolve(second), Some(message("second")));
        assert_eq!(ledger.resolve(third), Some(message("third")));
        assert_eq!(ledger.resolve(first), Some(message("first")));

        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn ledger_entries_resolve_exactly_once() {
        let ledger = ConfirmLedger::default();

        let seq = ledger.register(message("only"));

        assert!(ledger.resolve(seq).is_some());
        assert!(ledger.resolve(seq).is_none());
    }

    #[test]
    fn discarded_entries_do_not_leak() {
        let ledger = ConfirmLedger::default();

        let seq = ledger.register(message("aborted"));
        ledger.discard(seq);

        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn sequence_numbers_follow_publish_order() {
        let ledger = ConfirmLedger::default();

        let first = ledger.register(message("a"));
        let second = ledger.register(message("b"));

        assert!(second > first);
    }
}
