// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Plugin Registry
//!
//! Optional capabilities attached to a client at construction time. A plugin
//! supplies three operations through its [`PluginFactory`]: a default
//! configuration, a validity check and an instance constructor. The registry
//! holds at most one instance per plugin type, runs `initialize` hooks in
//! registration order once the client is connected, and runs `shutdown` hooks
//! in reverse registration order before the connection is released.
//!
//! Installation happens exclusively on the configuration object, before the
//! client exists; once the client is constructed the registry is frozen, so
//! no locking is needed for lookups at runtime.

use crate::errors::AmqpError;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::{debug, error};

/// Lifecycle hooks of an installed plugin.
///
/// Both hooks default to no-ops; implement them when the plugin owns
/// resources that must be set up after the client connects or released
/// before it disconnects.
#[async_trait]
pub trait Plugin: Any + Send + Sync {
    /// Runs once, after the client is connected, in registration order.
    async fn initialize(&self) -> Result<(), AmqpError> {
        Ok(())
    }

    /// Runs once, while the client closes, in reverse registration order.
    async fn shutdown(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

/// The three operations the registry needs from a plugin implementation.
pub trait PluginFactory {
    /// Configuration handed to the install closure.
    type Config: Send;
    /// The plugin instance constructed from a validated configuration.
    type Plugin: Plugin;

    /// Name used in configuration error messages.
    const NAME: &'static str;

    fn default_config() -> Self::Config;

    /// Rejects configurations the plugin cannot be constructed from.
    fn validate(config: &Self::Config) -> Result<(), AmqpError>;

    fn build(config: Self::Config) -> Result<Self::Plugin, AmqpError>;
}

struct PluginEntry {
    type_id: TypeId,
    name: &'static str,
    lifecycle: Arc<dyn Plugin>,
    instance: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry").field("name", &self.name).finish()
    }
}

/// Ordered collection of installed plugins, keyed by plugin type.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub(crate) fn new() -> Self {
        PluginRegistry::default()
    }

    /// Installs a plugin, applying `configure` to the factory's default
    /// configuration exactly once.
    ///
    /// Fails without constructing anything when a plugin of the same type is
    /// already installed or when the configured values do not validate; an
    /// already-registered first installation stays intact.
    pub(crate) fn install<F>(
        &mut self,
        configure: impl FnOnce(&mut F::Config),
    ) -> Result<(), AmqpError>
    where
        F: PluginFactory,
    {
        let type_id = TypeId::of::<F::Plugin>();

        if self.entries.iter().any(|entry| entry.type_id == type_id) {
            return Err(AmqpError::ConfigurationError(format!(
                "plugin `{}` is already installed",
                F::NAME
            )));
        }

        let mut config = F::default_config();
        configure(&mut config);
        F::validate(&config)?;

        let plugin = Arc::new(F::build(config)?);

        debug!(plugin = F::NAME, "plugin installed");

        self.entries.push(PluginEntry {
            type_id,
            name: F::NAME,
            lifecycle: plugin.clone(),
            instance: plugin,
        });

        Ok(())
    }

    /// Looks up an installed plugin by its exact type.
    ///
    /// Absence is a normal outcome; callers that require the plugin decide
    /// how to report it.
    pub fn get<P: Plugin>(&self) -> Option<Arc<P>> {
        self.entries
            .iter()
            .find(|entry| entry.type_id == TypeId::of::<P>())
            .and_then(|entry| entry.instance.clone().downcast::<P>().ok())
    }

    pub(crate) async fn initialize_all(&self) -> Result<(), AmqpError> {
        for entry in &self.entries {
            debug!(plugin = entry.name, "initializing plugin");
            entry.lifecycle.initialize().await?;
        }

        Ok(())
    }

    pub(crate) async fn shutdown_all(&self) {
        for entry in self.entries.iter().rev() {
            debug!(plugin = entry.name, "shutting down plugin");

            if let Err(err) = entry.lifecycle.shutdown().await {
                error!(
                    error = err.to_string(),
                    plugin = entry.name,
                    "plugin shutdown failed"
                );
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct ProbeConfig {
        events: Option<EventLog>,
        valid: bool,
    }

    fn probe_config() -> ProbeConfig {
        ProbeConfig {
            events: None,
            valid: true,
        }
    }

    fn build_probe(label: &'static str, config: ProbeConfig) -> Result<EventLog, AmqpError> {
        let events = config
            .events
            .ok_or_else(|| AmqpError::ConfigurationError("missing event log".to_owned()))?;
        events.lock().unwrap().push(format!("built:{label}"));
        Ok(events)
    }

    macro_rules! probe_plugin {
        ($plugin:ident, $factory:ident, $label:literal) => {
            struct $plugin {
                events: EventLog,
            }

            #[async_trait]
            impl Plugin for $plugin {
                async fn initialize(&self) -> Result<(), AmqpError> {
                    self.events.lock().unwrap().push(format!("init:{}", $label));
                    Ok(())
                }

                async fn shutdown(&self) -> Result<(), AmqpError> {
                    self.events.lock().unwrap().push(format!("down:{}", $label));
                    Ok(())
                }
            }

            struct $factory;

            impl PluginFactory for $factory {
                type Config = ProbeConfig;
                type Plugin = $plugin;

                const NAME: &'static str = $label;

                fn default_config() -> ProbeConfig {
                    probe_config()
                }

                fn validate(config: &ProbeConfig) -> Result<(), AmqpError> {
                    if config.valid && config.events.is_some() {
                        Ok(())
                    } else {
                        Err(AmqpError::ConfigurationError(format!(
                            "invalid configuration for plugin `{}`",
                            $label
                        )))
                    }
                }

                fn build(config: ProbeConfig) -> Result<$plugin, AmqpError> {
                    let events = build_probe($label, config)?;
                    Ok($plugin { events })
                }
            }
        };
    }

    probe_plugin!(PluginA, FactoryA, "plugin-a");
    probe_plugin!(PluginB, FactoryB, "plugin-b");

    fn events() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn duplicate_installation_is_rejected_and_first_stays() {
        let log = events();
        let mut registry = PluginRegistry::new();

        registry
            .install::<FactoryA>(|cfg| cfg.events = Some(log.clone()))
            .unwrap();

        let err = registry
            .install::<FactoryA>(|cfg| cfg.events = Some(log.clone()))
            .unwrap_err();

        assert!(matches!(err, AmqpError::ConfigurationError(_)));
        assert_eq!(registry.len(), 1);
        assert!(registry.get::<PluginA>().is_some());
    }

    #[test]
    fn invalid_configuration_constructs_nothing() {
        let log = events();
        let mut registry = PluginRegistry::new();

        let err = registry
            .install::<FactoryA>(|cfg| {
                cfg.events = Some(log.clone());
                cfg.valid = false;
            })
            .unwrap_err();

        assert!(matches!(err, AmqpError::ConfigurationError(_)));
        assert_eq!(registry.len(), 0);
        // validation failed before the factory ran
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn lookup_is_by_exact_type_and_absence_is_normal() {
        let log = events();
        let mut registry = PluginRegistry::new();

        registry
            .install::<FactoryA>(|cfg| cfg.events = Some(log.clone()))
            .unwrap();

        assert!(registry.get::<PluginA>().is_some());
        assert!(registry.get::<PluginB>().is_none());
    }

    #[tokio::test]
    async fn shutdown_runs_in_reverse_registration_order() {
        let log = events();
        let mut registry = PluginRegistry::new();

        registry
            .install::<FactoryA>(|cfg| cfg.events = Some(log.clone()))
            .unwrap();
        registry
            .install::<FactoryB>(|cfg| cfg.events = Some(log.clone()))
            .unwrap();

        registry.initialize_all().await.unwrap();
        registry.shutdown_all().await;

        let recorded = log.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                "built:plugin-a",
                "built:plugin-b",
                "init:plugin-a",
                "init:plugin-b",
                "down:plugin-b",
                "down:plugin-a",
            ]
        );
    }
}
