// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queues
//!
//! The queue declaration builder and the [`Queue`] handle returned by a
//! successful declare. When a queue is declared with an empty name the handle
//! carries the broker-assigned name, never the requested one.

use crate::{errors::AmqpError, sender::Sender};
use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, ShortString},
};
use std::collections::BTreeMap;

/// Options applied when declaring a queue.
///
/// All flags default to the broker-safe `false`; the configuration closure
/// passed to `declare_queue` mutates this in place and is invoked exactly
/// once.
#[derive(Debug, Clone, Default)]
pub struct QueueBuilder {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub arguments: BTreeMap<ShortString, AMQPValue>,
}

impl QueueBuilder {
    /// Adds a single declaration argument (an `x-*` extension key).
    pub fn argument(&mut self, key: &str, value: AMQPValue) -> &mut Self {
        self.arguments.insert(ShortString::from(key), value);
        self
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: self.passive,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            nowait: false,
        }
    }
}

/// Represents a queue declared on the broker.
///
/// The handle holds no local state beyond the name; the broker remains the
/// source of truth, and operations on a handle whose queue was deleted
/// broker-side surface the broker's error.
#[derive(Debug, Clone)]
pub struct Queue {
    name: String,
    sender: Sender,
}

impl Queue {
    pub(crate) fn new(name: String, sender: Sender) -> Self {
        Queue { name, sender }
    }

    /// The queue name as reported by the broker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deletes this queue.
    pub async fn delete(self, if_unused: bool, if_empty: bool) -> Result<(), AmqpError> {
        self.sender.delete_queue(&self.name, if_unused, if_empty).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_broker_safe() {
        let options = QueueBuilder::default().declare_options();

        assert_eq!(
            options,
            QueueDeclareOptions {
                passive: false,
                durable: false,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            }
        );
    }

    #[test]
    fn builder_flags_map_onto_declare_options() {
        let mut builder = QueueBuilder::default();
        builder.durable = true;
        builder.exclusive = true;
        builder.argument("x-message-ttl", AMQPValue::LongInt(30_000.into()));

        let options = builder.declare_options();

        assert!(options.durable);
        assert!(options.exclusive);
        assert!(!options.passive);
        assert!(builder
            .arguments
            .contains_key(&ShortString::from("x-message-ttl")));
    }
}
