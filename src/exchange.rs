// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchanges
//!
//! Exchange kinds, the declaration builder and the [`Exchange`] handle
//! returned by a successful declare. The handle is an immutable descriptor of
//! broker-side topology; every operation on it delegates to the sender that
//! declared it, and a handle whose exchange was deleted on the broker fails
//! with the broker's error on the next operation.

use crate::{
    binding::{ExchangeBinding, QueueBinding},
    errors::AmqpError,
    message::OutboundMessage,
    queue::Queue,
    sender::Sender,
};
use lapin::{
    options::ExchangeDeclareOptions,
    types::{AMQPValue, ShortString},
};
use std::collections::BTreeMap;

/// Represents the types of exchanges available in RabbitMQ.
///
/// - Direct: routes messages to queues on an exact routing-key match
/// - Fanout: broadcasts messages to all bound destinations
/// - Topic: routes on wildcard pattern matching of routing keys
/// - Headers: routes on message header values instead of routing keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// Options applied when declaring an exchange.
///
/// All flags default to the broker-safe `false`; the configuration closure
/// passed to `declare_exchange` mutates this in place and is invoked exactly
/// once.
#[derive(Debug, Clone, Default)]
pub struct ExchangeBuilder {
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub passive: bool,
    pub arguments: BTreeMap<ShortString, AMQPValue>,
}

impl ExchangeBuilder {
    /// Adds a single declaration argument (an `x-*` extension key).
    pub fn argument(&mut self, key: &str, value: AMQPValue) -> &mut Self {
        self.arguments.insert(ShortString::from(key), value);
        self
    }

    pub(crate) fn declare_options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            passive: self.passive,
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            nowait: false,
        }
    }
}

/// Represents an exchange declared on the broker.
#[derive(Debug, Clone)]
pub struct Exchange {
    name: String,
    kind: ExchangeKind,
    sender: Sender,
}

impl Exchange {
    pub(crate) fn new(name: String, kind: ExchangeKind, sender: Sender) -> Self {
        Exchange { name, kind, sender }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub(crate) fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Binds this exchange to another exchange.
    ///
    /// Messages published to this exchange with a matching `routing_key` are
    /// forwarded to `destination`.
    pub async fn bind_to_exchange(
        &self,
        destination: &Exchange,
        routing_key: &str,
    ) -> Result<ExchangeBinding, AmqpError> {
        self.sender
            .bind_exchange(&self.name, routing_key, destination.name())
            .await?;

        Ok(ExchangeBinding::new(
            self.name.clone(),
            destination.name().to_owned(),
            routing_key.to_owned(),
            self.sender.clone(),
        ))
    }

    /// Binds this exchange to a queue.
    ///
    /// Messages published to this exchange with a matching `routing_key`
    /// become consumable from `destination`.
    pub async fn bind_to_queue(
        &self,
        destination: &Queue,
        routing_key: &str,
    ) -> Result<QueueBinding, AmqpError> {
        self.sender
            .bind_queue(&self.name, routing_key, destination.name())
            .await?;

        Ok(QueueBinding::new(
            self.name.clone(),
            destination.name().to_owned(),
            routing_key.to_owned(),
            self.sender.clone(),
        ))
    }

    /// Publishes a single fire-and-forget message to this exchange.
    pub async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), AmqpError> {
        self.sender
            .send(vec![OutboundMessage::new(&self.name, routing_key, payload)])
            .await
    }

    /// Deletes this exchange.
    ///
    /// With `if_unused` set, the broker rejects the deletion while bindings
    /// still reference the exchange.
    pub async fn delete(self, if_unused: bool) -> Result<(), AmqpError> {
        self.sender.delete_exchange(&self.name, if_unused).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_broker_safe() {
        let options = ExchangeBuilder::default().declare_options();

        assert_eq!(
            options,
            ExchangeDeclareOptions {
                passive: false,
                durable: false,
                auto_delete: false,
                internal: false,
                nowait: false,
            }
        );
    }

    #[test]
    fn builder_flags_map_onto_declare_options() {
        let mut builder = ExchangeBuilder::default();
        builder.durable = true;
        builder.internal = true;
        builder.argument("x-alternate-exchange", AMQPValue::LongString("alt".into()));

        let options = builder.declare_options();

        assert!(options.durable);
        assert!(options.internal);
        assert!(!options.auto_delete);
        assert_eq!(builder.arguments.len(), 1);
    }

    #[test]
    fn kind_conversion_is_total() {
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Direct),
            lapin::ExchangeKind::Direct
        );
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Fanout),
            lapin::ExchangeKind::Fanout
        );
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Topic),
            lapin::ExchangeKind::Topic
        );
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Headers),
            lapin::ExchangeKind::Headers
        );
    }
}
