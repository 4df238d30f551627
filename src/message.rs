// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Types
//!
//! Value types crossing the bridge in both directions: [`OutboundMessage`]
//! for publishing, [`OutboundMessageResult`] for publisher confirmations and
//! [`InboundDelivery`] for consumed messages.

use lapin::{
    message::{BasicReturnMessage, Delivery},
    publisher_confirm::Confirmation,
    types::{AMQPValue, ShortString},
    BasicProperties,
};
use std::collections::BTreeMap;

/// A message to be published to an exchange.
///
/// Transient: the sender only retains it while a publisher confirmation for
/// it is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    headers: BTreeMap<ShortString, AMQPValue>,
    content_type: Option<String>,
}

impl OutboundMessage {
    /// Creates a message targeting `exchange` with the given routing key.
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        OutboundMessage {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload,
            headers: BTreeMap::default(),
            content_type: None,
        }
    }

    /// Adds a single message header.
    pub fn with_header(mut self, key: &str, value: AMQPValue) -> Self {
        self.headers.insert(ShortString::from(key), value);
        self
    }

    /// Sets the content type stamped on the message properties.
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn headers(&self) -> &BTreeMap<ShortString, AMQPValue> {
        &self.headers
    }

    pub(crate) fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// The broker's verdict for one published message on the confirming path.
///
/// Exactly one result is produced per submitted message; results may arrive
/// in any order relative to submission.
#[derive(Debug)]
pub struct OutboundMessageResult {
    /// The message this confirmation refers to
    pub message: OutboundMessage,
    /// Whether the broker ack'ed (`true`) or nack'ed (`false`) the message
    pub confirmed: bool,
    /// The returned message when the broker could not route it
    pub returned: Option<BasicReturnMessage>,
}

impl OutboundMessageResult {
    pub(crate) fn new(message: OutboundMessage, confirmation: Confirmation) -> Self {
        let (confirmed, returned) = match confirmation {
            Confirmation::Ack(returned) => (true, returned.map(|boxed| *boxed)),
            Confirmation::Nack(returned) => (false, returned.map(|boxed| *boxed)),
            Confirmation::NotRequested => (true, None),
        };

        OutboundMessageResult {
            message,
            confirmed,
            returned,
        }
    }
}

/// A message delivered by the broker, detached from its acknowledgement.
///
/// This is what auto-ack consumption yields; manual-ack consumption wraps it
/// in an acknowledgement handle instead.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    payload: Vec<u8>,
    exchange: String,
    routing_key: String,
    redelivered: bool,
    properties: BasicProperties,
}

impl InboundDelivery {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the delivery, returning the raw payload bytes.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.properties
    }
}

impl From<Delivery> for InboundDelivery {
    fn from(delivery: Delivery) -> Self {
        InboundDelivery {
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            payload: delivery.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_target_and_headers() {
        let message = OutboundMessage::new("orders", "created", b"order-42".to_vec())
            .with_header("x-origin", AMQPValue::LongString("checkout".into()))
            .with_content_type("application/json");

        assert_eq!(message.exchange(), "orders");
        assert_eq!(message.routing_key(), "created");
        assert_eq!(message.payload(), b"order-42");
        assert_eq!(message.content_type(), Some("application/json"));
        assert!(message.headers().contains_key(&ShortString::from("x-origin")));
    }

    #[test]
    fn ack_confirmation_maps_to_confirmed_result() {
        let message = OutboundMessage::new("orders", "created", vec![1, 2, 3]);

        let result = OutboundMessageResult::new(message.clone(), Confirmation::Ack(None));

        assert!(result.confirmed);
        assert!(result.returned.is_none());
        assert_eq!(result.message, message);
    }

    #[test]
    fn nack_confirmation_maps_to_unconfirmed_result() {
        let message = OutboundMessage::new("orders", "created", vec![]);

        let result = OutboundMessageResult::new(message, Confirmation::Nack(None));

        assert!(!result.confirmed);
    }
}
