// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Client Façade
//!
//! [`RabbitClient`] owns exactly one connection for its lifetime. It carries
//! a default sender and receiver bridge (each on its own channel), mints
//! additional independent bridges on demand, and hosts the plugin registry.
//!
//! Plugins are installed on the [`ClientConfiguration`] before the client
//! exists, so the registry is immutable once any broker interaction can
//! happen. Teardown order is fixed: every owned bridge channel closes first,
//! then plugin shutdown hooks run in reverse registration order, then the
//! connection is released. `close` is idempotent.

use crate::{
    channel,
    config::AmqpConfig,
    errors::AmqpError,
    exchange::{Exchange, ExchangeBuilder, ExchangeKind},
    message::{OutboundMessage, OutboundMessageResult},
    plugin::{Plugin, PluginFactory, PluginRegistry},
    queue::{Queue, QueueBuilder},
    receiver::{AckSubscription, AutoAckHandler, ManualAckHandler, Receiver, Subscription},
    sender::{ConfirmStream, Sender},
};
use lapin::{protocol::constants::REPLY_SUCCESS, Channel, Connection};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Configuration assembled before the client connects.
///
/// This is the only phase in which the plugin registry is writable; the
/// single-writer discipline required by the registry is enforced by
/// construction.
pub struct ClientConfiguration {
    config: AmqpConfig,
    registry: PluginRegistry,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        ClientConfiguration {
            config: AmqpConfig::default(),
            registry: PluginRegistry::new(),
        }
    }
}

impl ClientConfiguration {
    /// Sets the connection parameters.
    pub fn config(&mut self, config: AmqpConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Installs a plugin.
    ///
    /// The `configure` closure is applied to the factory's default
    /// configuration exactly once. Installing the same plugin type twice, or
    /// a configuration that fails validation, is rejected here, before any
    /// broker interaction, and leaves previous installations intact.
    pub fn install<F>(&mut self, configure: impl FnOnce(&mut F::Config)) -> Result<(), AmqpError>
    where
        F: PluginFactory,
    {
        self.registry.install::<F>(configure)
    }
}

struct ClientInner {
    connection: Connection,
    sender: Sender,
    receiver: Receiver,
    plugins: Arc<PluginRegistry>,
    channels: Mutex<Vec<Channel>>,
    closed: AtomicBool,
}

/// A RabbitMQ client: one connection, lazily minted bridges, an optional set
/// of plugins.
///
/// Cloning is cheap; clones share the connection and the registry.
#[derive(Clone)]
pub struct RabbitClient {
    inner: Arc<ClientInner>,
}

/// Creates a new [`RabbitClient`], applying `configure` to a default
/// [`ClientConfiguration`] before connecting.
pub async fn create_client<F>(configure: F) -> Result<RabbitClient, AmqpError>
where
    F: FnOnce(&mut ClientConfiguration) -> Result<(), AmqpError>,
{
    let mut configuration = ClientConfiguration::default();
    configure(&mut configuration)?;

    RabbitClient::connect(configuration).await
}

impl RabbitClient {
    /// Connects to the broker and assembles the client.
    ///
    /// Plugin `initialize` hooks run in registration order once the
    /// connection and the default bridges are up.
    pub async fn connect(configuration: ClientConfiguration) -> Result<RabbitClient, AmqpError> {
        let ClientConfiguration { config, registry } = configuration;

        let connection = channel::new_amqp_connection(&config).await?;
        let plugins = Arc::new(registry);

        let sender_channel = channel::open_channel(&connection).await?;
        let receiver_channel = channel::open_channel(&connection).await?;

        let sender = Sender::new(sender_channel.clone(), plugins.clone());
        let receiver = Receiver::new(receiver_channel.clone(), plugins.clone());

        let client = RabbitClient {
            inner: Arc::new(ClientInner {
                connection,
                sender,
                receiver,
                plugins,
                channels: Mutex::new(vec![
                    (*sender_channel).clone(),
                    (*receiver_channel).clone(),
                ]),
                closed: AtomicBool::new(false),
            }),
        };

        client.inner.plugins.initialize_all().await?;

        Ok(client)
    }

    /// The client's default outbound bridge.
    pub fn sender(&self) -> &Sender {
        &self.inner.sender
    }

    /// The client's default inbound bridge.
    pub fn receiver(&self) -> &Receiver {
        &self.inner.receiver
    }

    /// Mints an independent outbound bridge on its own channel.
    pub async fn create_sender(&self) -> Result<Sender, AmqpError> {
        let channel = channel::open_channel(&self.inner.connection).await?;
        self.inner.channels.lock().await.push((*channel).clone());

        Ok(Sender::new(channel, self.inner.plugins.clone()))
    }

    /// Mints an independent inbound bridge on its own channel.
    pub async fn create_receiver(&self) -> Result<Receiver, AmqpError> {
        let channel = channel::open_channel(&self.inner.connection).await?;
        self.inner.channels.lock().await.push((*channel).clone());

        Ok(Receiver::new(channel, self.inner.plugins.clone()))
    }

    /// Looks up an installed plugin by its exact type.
    ///
    /// Returns `None` when no plugin of that type was installed; absence is a
    /// normal outcome.
    pub fn get_plugin<P: Plugin>(&self) -> Option<Arc<P>> {
        self.inner.plugins.get::<P>()
    }

    /// Declares an exchange through the default sender.
    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        configure: impl FnOnce(&mut ExchangeBuilder),
    ) -> Result<Exchange, AmqpError> {
        self.inner.sender.declare_exchange(name, kind, configure).await
    }

    /// Declares a queue through the default sender.
    pub async fn declare_queue(
        &self,
        name: &str,
        configure: impl FnOnce(&mut QueueBuilder),
    ) -> Result<Queue, AmqpError> {
        self.inner.sender.declare_queue(name, configure).await
    }

    /// Publishes a batch of messages, fire and forget.
    pub async fn send(&self, messages: Vec<OutboundMessage>) -> Result<(), AmqpError> {
        self.inner.sender.send(messages).await
    }

    /// Publishes a batch of messages and suspends until every confirmation
    /// is resolved.
    pub async fn send_and_confirm<F>(
        &self,
        messages: Vec<OutboundMessage>,
        on_result: F,
    ) -> Result<(), AmqpError>
    where
        F: FnMut(OutboundMessageResult),
    {
        self.inner.sender.send_and_confirm(messages, on_result).await
    }

    /// Publishes a batch of messages, returning the confirmations as a
    /// stream the caller drives.
    pub async fn send_and_confirm_stream(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> Result<ConfirmStream, AmqpError> {
        self.inner.sender.send_and_confirm_stream(messages).await
    }

    /// Opens an auto-ack subscription through the default receiver.
    pub async fn consume_auto_ack(&self, queue: &str) -> Result<Subscription, AmqpError> {
        self.inner.receiver.consume_auto_ack(queue).await
    }

    /// Consumes a queue in auto-ack mode with a per-delivery handler.
    pub async fn consume_auto_ack_with(
        &self,
        queue: &str,
        handler: Arc<dyn AutoAckHandler>,
    ) -> Result<(), AmqpError> {
        self.inner.receiver.consume_auto_ack_with(queue, handler).await
    }

    /// Opens a manual-ack subscription through the default receiver.
    pub async fn consume(&self, queue: &str) -> Result<AckSubscription, AmqpError> {
        self.inner.receiver.consume(queue).await
    }

    /// Consumes a queue in manual-ack mode with a per-delivery handler.
    pub async fn consume_with(
        &self,
        queue: &str,
        handler: Arc<dyn ManualAckHandler>,
    ) -> Result<(), AmqpError> {
        self.inner.receiver.consume_with(queue, handler).await
    }

    /// Closes the client.
    ///
    /// Closes every owned bridge channel, runs plugin shutdown hooks in
    /// reverse registration order, then releases the connection. Calling
    /// `close` again after it returned is a no-op.
    pub async fn close(&self) -> Result<(), AmqpError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("closing amqp client...");

        let channels = {
            let mut guard = self.inner.channels.lock().await;
            std::mem::take(&mut *guard)
        };

        for channel in channels {
            if let Err(err) = channel.close(REPLY_SUCCESS, "client shutdown").await {
                warn!(
                    error = err.to_string(),
                    "failure to close a channel during shutdown"
                );
            }
        }

        self.inner.plugins.shutdown_all().await;

        if let Err(err) = self.inner.connection.close(REPLY_SUCCESS, "client shutdown").await {
            warn!(error = err.to_string(), "failure to close the connection");
            return Err(AmqpError::from_lapin("connection.close", err));
        }

        debug!("amqp client closed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::Serialization;

    #[test]
    fn duplicate_plugin_installation_fails_fast() {
        let mut configuration = ClientConfiguration::default();

        configuration
            .install::<Serialization>(|cfg| {
                cfg.json();
            })
            .unwrap();

        let err = configuration
            .install::<Serialization>(|cfg| {
                cfg.json();
            })
            .unwrap_err();

        assert!(matches!(err, AmqpError::ConfigurationError(_)));
    }

    #[test]
    fn invalid_plugin_configuration_fails_fast() {
        let mut configuration = ClientConfiguration::default();

        let err = configuration.install::<Serialization>(|_cfg| {}).unwrap_err();

        assert!(matches!(err, AmqpError::ConfigurationError(_)));
    }
}
