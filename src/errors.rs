// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Client
//!
//! This module provides the error taxonomy for every operation exposed by the
//! client. The `AmqpError` enum distinguishes broker-rejected commands from
//! transport failures, and keeps configuration and misuse errors separate so
//! callers can react to each class differently.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Broker rejections (`BrokerError`) and transport failures (`TransportError`)
/// are never retried by the client; retries are a caller concern.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The broker rejected a command (type mismatch on an existing exchange,
    /// exchange in use on delete-if-unused, unknown queue, ...)
    #[error("broker rejected `{0}`: {1}")]
    BrokerError(String, String),

    /// Connection or channel failure while an operation was in flight
    #[error("transport failure during `{0}`: {1}")]
    TransportError(String, String),

    /// Invalid or duplicate plugin installation, or a plugin required by an
    /// invoked operation is missing
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    /// A delivery was acknowledged or rejected more than once
    #[error("delivery was already acknowledged or rejected")]
    AlreadyAcknowledged,

    /// Error serializing or deserializing a message payload
    #[error("failure to parse payload: {0}")]
    SerializationError(String),
}

impl AmqpError {
    /// Classifies a lapin error for the given operation.
    ///
    /// A `ProtocolError` means the broker itself refused the command; anything
    /// else is a failure of the transport underneath it.
    pub(crate) fn from_lapin(operation: &str, err: lapin::Error) -> Self {
        match err {
            lapin::Error::ProtocolError(amqp) => {
                AmqpError::BrokerError(operation.to_owned(), amqp.to_string())
            }
            other => AmqpError::TransportError(operation.to_owned(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::{AMQPError, AMQPErrorKind, AMQPSoftError};
    use lapin::types::ShortString;
    use std::sync::Arc;

    #[test]
    fn broker_rejections_classify_as_broker_errors() {
        let rejection = lapin::Error::ProtocolError(AMQPError::new(
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
            ShortString::from("PRECONDITION_FAILED - inequivalent arg 'type'"),
        ));

        match AmqpError::from_lapin("exchange.declare", rejection) {
            AmqpError::BrokerError(operation, reason) => {
                assert_eq!(operation, "exchange.declare");
                assert!(reason.contains("PRECONDITION_FAILED"));
            }
            other => panic!("expected a broker error, got {other:?}"),
        }
    }

    #[test]
    fn io_failures_classify_as_transport_errors() {
        let io = lapin::Error::IOError(Arc::new(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "connection reset",
        )));

        match AmqpError::from_lapin("basic.publish", io) {
            AmqpError::TransportError(operation, _) => {
                assert_eq!(operation, "basic.publish");
            }
            other => panic!("expected a transport error, got {other:?}"),
        }
    }
}
