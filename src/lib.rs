// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Sequential-style RabbitMQ client built on lapin.
//!
//! Declaring topology, publishing with confirmations and consuming queues are
//! exposed as plain async calls and streams instead of raw callbacks; a
//! plugin registry attaches optional capabilities such as payload
//! serialization to the client at construction time.

mod channel;
mod otel;

pub mod binding;
pub mod client;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod plugin;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod serialization;

pub use client::{create_client, ClientConfiguration, RabbitClient};
pub use config::AmqpConfig;
pub use errors::AmqpError;
pub use exchange::{Exchange, ExchangeKind};
pub use message::{InboundDelivery, OutboundMessage, OutboundMessageResult};
pub use queue::Queue;
pub use receiver::{AcknowledgeHandler, Receiver};
pub use sender::Sender;
