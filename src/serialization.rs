// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Serialization Plugin
//!
//! Optional payload serialization, installed as a plugin. The plugin holds a
//! single [`SerializationProvider`] that turns values into bytes and back;
//! which codec applies to a value is the provider's concern, the client only
//! routes through it.
//!
//! Typed operations ([`Exchange::publish_typed`],
//! [`Receiver::consume_auto_ack_typed`]) look the plugin up when invoked and
//! fail with a descriptive configuration error when it was never installed;
//! the lookup itself is not an error path.

use crate::{
    errors::AmqpError,
    exchange::Exchange,
    message::OutboundMessage,
    plugin::{Plugin, PluginFactory, PluginRegistry},
    receiver::Receiver,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Provider used for serializing message payloads.
///
/// Implementations are black boxes to the client: bytes in, bytes out.
#[cfg_attr(test, automock)]
pub trait SerializationProvider: Send + Sync {
    /// Content type stamped on messages produced by this provider.
    fn content_type(&self) -> &str;

    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, AmqpError>;

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, AmqpError>;
}

/// JSON provider backed by serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProvider;

impl SerializationProvider for JsonProvider {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|err| AmqpError::SerializationError(err.to_string()))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, AmqpError> {
        serde_json::from_slice(bytes).map_err(|err| AmqpError::SerializationError(err.to_string()))
    }
}

/// Configuration of the serialization plugin.
///
/// A provider must be chosen; the default configuration is invalid on
/// purpose so a provider-less install fails at install time.
#[derive(Default)]
pub struct SerializationConfig {
    provider: Option<Box<dyn SerializationProvider>>,
}

impl SerializationConfig {
    /// Uses the bundled JSON provider.
    pub fn json(&mut self) -> &mut Self {
        self.provider = Some(Box::new(JsonProvider));
        self
    }

    /// Uses a custom provider.
    pub fn provider(&mut self, provider: Box<dyn SerializationProvider>) -> &mut Self {
        self.provider = Some(provider);
        self
    }
}

/// The installed serialization capability.
pub struct SerializationPlugin {
    provider: Box<dyn SerializationProvider>,
}

#[async_trait]
impl Plugin for SerializationPlugin {}

impl SerializationPlugin {
    pub fn content_type(&self) -> &str {
        self.provider.content_type()
    }

    /// Serializes a value through the configured provider.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        let value =
            serde_json::to_value(value).map_err(|err| AmqpError::SerializationError(err.to_string()))?;

        self.provider.to_bytes(&value)
    }

    /// Deserializes a payload through the configured provider.
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, AmqpError> {
        let value = self.provider.from_bytes(bytes)?;

        serde_json::from_value(value).map_err(|err| AmqpError::SerializationError(err.to_string()))
    }
}

/// Factory installing the serialization plugin.
pub struct Serialization;

impl PluginFactory for Serialization {
    type Config = SerializationConfig;
    type Plugin = SerializationPlugin;

    const NAME: &'static str = "serialization";

    fn default_config() -> SerializationConfig {
        SerializationConfig::default()
    }

    fn validate(config: &SerializationConfig) -> Result<(), AmqpError> {
        if config.provider.is_some() {
            Ok(())
        } else {
            Err(AmqpError::ConfigurationError(
                "the serialization plugin requires a provider".to_owned(),
            ))
        }
    }

    fn build(mut config: SerializationConfig) -> Result<SerializationPlugin, AmqpError> {
        let provider = config.provider.take().ok_or_else(|| {
            AmqpError::ConfigurationError("the serialization plugin requires a provider".to_owned())
        })?;

        Ok(SerializationPlugin { provider })
    }
}

fn serialization_plugin(plugins: &PluginRegistry) -> Result<Arc<SerializationPlugin>, AmqpError> {
    plugins.get::<SerializationPlugin>().ok_or_else(|| {
        AmqpError::ConfigurationError(
            "the serialization plugin must be installed before using typed operations".to_owned(),
        )
    })
}

impl Exchange {
    /// Serializes `value` with the installed serialization plugin and
    /// publishes it to this exchange, fire and forget.
    pub async fn publish_typed<T: Serialize>(
        &self,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError> {
        let plugin = serialization_plugin(self.sender().plugins())?;

        let payload = plugin.serialize(value)?;
        let message = OutboundMessage::new(self.name(), routing_key, payload)
            .with_content_type(plugin.content_type());

        self.sender().send(vec![message]).await
    }
}

impl Receiver {
    /// Consumes `queue` in auto-ack mode, deserializing every payload with
    /// the installed serialization plugin.
    ///
    /// Deliveries whose payload does not decode as `T` are logged and
    /// skipped.
    pub async fn consume_auto_ack_typed<T>(
        &self,
        queue: &str,
    ) -> Result<impl Stream<Item = T>, AmqpError>
    where
        T: DeserializeOwned,
    {
        let plugin = serialization_plugin(self.plugins())?;
        let subscription = self.consume_auto_ack(queue).await?;

        Ok(subscription.filter_map(move |item| {
            let plugin = plugin.clone();

            async move {
                match item {
                    Ok(delivery) => match plugin.deserialize::<T>(delivery.payload()) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            warn!(error = err.to_string(), "skipping undecodable delivery");
                            None
                        }
                    },
                    Err(err) => {
                        warn!(
                            error = err.to_string(),
                            "subscription failure during typed consume"
                        );
                        None
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginRegistry;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        status: String,
    }

    fn json_plugin() -> SerializationPlugin {
        SerializationPlugin {
            provider: Box::new(JsonProvider),
        }
    }

    #[test]
    fn json_provider_roundtrips_values() {
        let plugin = json_plugin();
        let order = Order {
            id: 42,
            status: "created".to_owned(),
        };

        let bytes = plugin.serialize(&order).unwrap();
        let decoded: Order = plugin.deserialize(&bytes).unwrap();

        assert_eq!(decoded, order);
    }

    #[test]
    fn undecodable_payloads_surface_serialization_errors() {
        let plugin = json_plugin();

        let err = plugin.deserialize::<Order>(b"not json").unwrap_err();

        assert!(matches!(err, AmqpError::SerializationError(_)));
    }

    #[test]
    fn serialize_delegates_to_the_provider() {
        let mut provider = MockSerializationProvider::new();
        provider
            .expect_to_bytes()
            .times(1)
            .returning(|value| Ok(value.to_string().into_bytes()));

        let plugin = SerializationPlugin {
            provider: Box::new(provider),
        };

        let bytes = plugin.serialize(&7u8).unwrap();

        assert_eq!(bytes, b"7");
    }

    #[test]
    fn provider_less_configuration_is_invalid() {
        let config = Serialization::default_config();

        assert!(Serialization::validate(&config).is_err());
    }

    #[test]
    fn installed_plugin_is_reachable_by_type() {
        let mut registry = PluginRegistry::new();

        registry
            .install::<Serialization>(|cfg| {
                cfg.json();
            })
            .unwrap();

        assert!(registry.get::<SerializationPlugin>().is_some());
    }
}
