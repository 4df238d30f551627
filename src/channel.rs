// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! This module handles the creation of the AMQP connection and of the
//! channels the sender and receiver bridges run on. One connection is shared
//! by the whole client; every bridge gets its own channel.

use crate::{config::AmqpConfig, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Establishes the connection to RabbitMQ described by `cfg`.
///
/// The connection is named after `cfg.app_name` so it can be identified in
/// the broker's management UI.
pub(crate) async fn new_amqp_connection(cfg: &AmqpConfig) -> Result<Connection, AmqpError> {
    debug!("creating amqp connection...");

    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }?;

    debug!("amqp connected");

    Ok(conn)
}

/// Opens a new channel on an established connection.
pub(crate) async fn open_channel(conn: &Connection) -> Result<Arc<Channel>, AmqpError> {
    debug!("creating amqp channel...");

    match conn.create_channel().await {
        Ok(channel) => {
            debug!("channel created");
            Ok(Arc::new(channel))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
