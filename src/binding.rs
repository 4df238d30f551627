// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Bindings
//!
//! Handles for routing rules created by a successful bind call. A binding is
//! a relationship, not an owned resource: the broker stays the source of
//! truth, and two handles are equal whenever their
//! `(source, destination, routing key)` triples are equal.
//!
//! `unbind` consumes the handle, so a binding cannot be unbound through it
//! twice; at the protocol level unbinding is idempotent and unbinding a
//! binding that no longer exists does not fail.

use crate::{errors::AmqpError, sender::Sender};

/// The identifying triple of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindingKey {
    pub(crate) source: String,
    pub(crate) destination: String,
    pub(crate) routing_key: String,
}

/// Represents a binding between two exchanges.
#[derive(Debug, Clone)]
pub struct ExchangeBinding {
    key: BindingKey,
    sender: Sender,
}

impl ExchangeBinding {
    pub(crate) fn new(
        source: String,
        destination: String,
        routing_key: String,
        sender: Sender,
    ) -> Self {
        ExchangeBinding {
            key: BindingKey {
                source,
                destination,
                routing_key,
            },
            sender,
        }
    }

    /// The exchange the messages come from.
    pub fn source(&self) -> &str {
        &self.key.source
    }

    /// The exchange the messages are routed to.
    pub fn destination(&self) -> &str {
        &self.key.destination
    }

    pub fn routing_key(&self) -> &str {
        &self.key.routing_key
    }

    /// Removes this binding from the broker.
    pub async fn unbind(self) -> Result<(), AmqpError> {
        self.sender
            .unbind_exchange(&self.key.source, &self.key.routing_key, &self.key.destination)
            .await
    }
}

impl PartialEq for ExchangeBinding {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ExchangeBinding {}

/// Represents a binding between an exchange and a queue.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    key: BindingKey,
    sender: Sender,
}

impl QueueBinding {
    pub(crate) fn new(
        source: String,
        destination: String,
        routing_key: String,
        sender: Sender,
    ) -> Self {
        QueueBinding {
            key: BindingKey {
                source,
                destination,
                routing_key,
            },
            sender,
        }
    }

    /// The exchange the messages come from.
    pub fn source(&self) -> &str {
        &self.key.source
    }

    /// The queue the messages are routed to.
    pub fn destination(&self) -> &str {
        &self.key.destination
    }

    pub fn routing_key(&self) -> &str {
        &self.key.routing_key
    }

    /// Removes this binding from the broker.
    pub async fn unbind(self) -> Result<(), AmqpError> {
        self.sender
            .unbind_queue(&self.key.source, &self.key.routing_key, &self.key.destination)
            .await
    }
}

impl PartialEq for QueueBinding {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueueBinding {}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(source: &str, destination: &str, routing_key: &str) -> BindingKey {
        BindingKey {
            source: source.to_owned(),
            destination: destination.to_owned(),
            routing_key: routing_key.to_owned(),
        }
    }

    #[test]
    fn triples_identify_bindings() {
        assert_eq!(key("orders", "orders.q", "created"), key("orders", "orders.q", "created"));
    }

    #[test]
    fn any_differing_component_distinguishes_bindings() {
        let reference = key("orders", "orders.q", "created");

        assert_ne!(reference, key("billing", "orders.q", "created"));
        assert_ne!(reference, key("orders", "billing.q", "created"));
        assert_ne!(reference, key("orders", "orders.q", "cancelled"));
    }
}
