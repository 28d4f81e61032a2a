//! # Plugin Lifecycle
//!
//! Plugins are external adapters (a database pool, a cache client) exposed
//! to actions through `context.plugins[name]`. The engine owns one logical
//! plugin instance per configured key for the whole process lifetime:
//!
//! 1. Configuration enumerates plugins by logical key with a `type`
//!    discriminator (`"database": {"type": "postgres", …}`).
//! 2. [`PluginRegistry`] maps each `type` to a factory; the engine
//!    instantiates the plugin and awaits [`Plugin::setup`]. Any setup
//!    failure aborts startup.
//! 3. Before a flow runs, the executor copies `name → client` into the
//!    request context. [`Plugin::client`] fails loudly before a successful
//!    setup.
//! 4. On shutdown, [`Plugin::teardown`] runs exactly once per plugin;
//!    teardown errors are logged, not rethrown.
//!
//! Clients are opaque [`Arc`] handles; actions downcast through
//! [`FluxContext::plugin_as`](crate::context::FluxContext::plugin_as). The
//! built-in `memory` plugin (feature `memory-plugin`, on by default)
//! provides a process-local key-value store for tests and small deployments.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Opaque client handle injected into request contexts.
pub type PluginClient = Arc<dyn Any + Send + Sync>;

/// Errors raised by plugin construction and lifecycle transitions.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' setup failed: {1}")]
    Setup(String, String),
    #[error("plugin '{0}' teardown failed: {1}")]
    Teardown(String, String),
    #[error("plugin '{0}' client requested before setup")]
    NotReady(String),
    #[error("unknown plugin type '{kind}' configured for '{key}'")]
    UnknownType { key: String, kind: String },
}

/// One external adapter with an async lifecycle.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The logical key this plugin was configured under.
    fn name(&self) -> &str;

    /// Acquire resources. Runs once at startup; failure is fatal.
    async fn setup(&mut self, config: &Value) -> Result<(), PluginError>;

    /// Release resources. Runs once at shutdown.
    async fn teardown(&mut self) -> Result<(), PluginError>;

    /// The client injected into request contexts. Must fail with
    /// [`PluginError::NotReady`] before a successful [`Plugin::setup`].
    fn client(&self) -> Result<PluginClient, PluginError>;
}

/// Factory building an un-setup plugin from its logical key.
pub type PluginFactory = Box<dyn Fn(&str) -> Box<dyn Plugin> + Send + Sync>;

/// Maps configuration `type` discriminators to plugin factories.
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry, then extended with built-ins enabled by features.
    pub fn new() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self {
            factories: HashMap::new(),
        };
        #[cfg(feature = "memory-plugin")]
        registry.register("memory", |key| {
            Box::new(MemoryPlugin::new(key)) as Box<dyn Plugin>
        });
        registry
    }

    /// Register a factory for a `type` discriminator, replacing any
    /// previous one.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Instantiate the plugin configured at `key` with the given `type`.
    pub fn instantiate(&self, key: &str, kind: &str) -> Result<Box<dyn Plugin>, PluginError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| PluginError::UnknownType {
                key: key.to_string(),
                kind: kind.to_string(),
            })?;
        Ok(factory(key))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The instantiated plugins of one engine, in deterministic setup order.
pub struct PluginSet {
    plugins: Vec<(String, Value, Box<dyn Plugin>)>,
    ready: bool,
    torn_down: bool,
}

impl PluginSet {
    /// Instantiate every configured plugin. `configs` maps logical key to
    /// `(type, opts)`; instantiation order is sorted by key so startup logs
    /// are stable.
    pub fn from_configs(
        registry: &PluginRegistry,
        configs: impl IntoIterator<Item = (String, String, Value)>,
    ) -> Result<Self, PluginError> {
        let mut plugins: Vec<(String, Value, Box<dyn Plugin>)> = Vec::new();
        for (key, kind, opts) in configs {
            let plugin = registry.instantiate(&key, &kind)?;
            plugins.push((key, opts, plugin));
        }
        plugins.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self {
            plugins,
            ready: false,
            torn_down: false,
        })
    }

    /// An empty set for engines with no plugins configured.
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
            ready: true,
            torn_down: false,
        }
    }

    /// Run `setup` on every plugin. All plugins must complete before any
    /// endpoint is registered; the first failure aborts startup.
    pub async fn setup_all(&mut self) -> Result<(), PluginError> {
        for (key, opts, plugin) in &mut self.plugins {
            debug!(plugin = %key, "plugin setup");
            plugin.setup(opts).await?;
            info!(plugin = %key, "plugin ready");
        }
        self.ready = true;
        Ok(())
    }

    /// Copy `name → client` for injection into a request context.
    pub fn clients(&self) -> Result<HashMap<String, PluginClient>, PluginError> {
        if !self.ready {
            let name = self
                .plugins
                .first()
                .map(|(key, _, _)| key.clone())
                .unwrap_or_default();
            return Err(PluginError::NotReady(name));
        }
        let mut clients = HashMap::with_capacity(self.plugins.len());
        for (key, _, plugin) in &self.plugins {
            clients.insert(key.clone(), plugin.client()?);
        }
        Ok(clients)
    }

    /// Run `teardown` on every plugin, exactly once per process. Errors are
    /// logged and swallowed so shutdown always completes.
    pub async fn teardown_all(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for (key, _, plugin) in &mut self.plugins {
            if let Err(err) = plugin.teardown().await {
                error!(plugin = %key, error = %err, "plugin teardown failed");
            } else {
                debug!(plugin = %key, "plugin torn down");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }
}

// ── Built-in memory plugin ─────────────────────────────────────────────────

/// Client exposed by the `memory` plugin: a process-local KV store.
#[cfg(feature = "memory-plugin")]
#[derive(Debug, Default)]
pub struct MemoryClient {
    data: std::sync::Mutex<HashMap<String, Value>>,
}

#[cfg(feature = "memory-plugin")]
impl MemoryClient {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Built-in plugin registered under type `"memory"`.
#[cfg(feature = "memory-plugin")]
pub struct MemoryPlugin {
    name: String,
    client: Option<Arc<MemoryClient>>,
}

#[cfg(feature = "memory-plugin")]
impl MemoryPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: None,
        }
    }
}

#[cfg(feature = "memory-plugin")]
#[async_trait]
impl Plugin for MemoryPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self, _config: &Value) -> Result<(), PluginError> {
        self.client = Some(Arc::new(MemoryClient::default()));
        Ok(())
    }

    async fn teardown(&mut self) -> Result<(), PluginError> {
        self.client = None;
        Ok(())
    }

    fn client(&self) -> Result<PluginClient, PluginError> {
        self.client
            .as_ref()
            .map(|c| c.clone() as PluginClient)
            .ok_or_else(|| PluginError::NotReady(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[cfg(feature = "memory-plugin")]
    #[tokio::test]
    async fn test_memory_plugin_lifecycle() {
        let mut plugin = MemoryPlugin::new("cache");
        assert!(matches!(plugin.client(), Err(PluginError::NotReady(_))));

        plugin.setup(&json!({})).await.unwrap();
        let client = plugin.client().unwrap();
        let kv = client.downcast::<MemoryClient>().unwrap();
        kv.set("k", json!(1));
        assert_eq!(kv.get("k"), Some(json!(1)));
        assert_eq!(kv.remove("k"), Some(json!(1)));
        assert!(kv.is_empty());

        plugin.teardown().await.unwrap();
        assert!(plugin.client().is_err());
    }

    #[cfg(feature = "memory-plugin")]
    #[tokio::test]
    async fn test_plugin_set_setup_and_clients() {
        let registry = PluginRegistry::new();
        let mut set = PluginSet::from_configs(
            &registry,
            [
                ("cache".to_string(), "memory".to_string(), json!({})),
                ("sessions".to_string(), "memory".to_string(), json!({})),
            ],
        )
        .unwrap();

        assert!(set.clients().is_err(), "clients before setup must fail");

        set.setup_all().await.unwrap();
        let clients = set.clients().unwrap();
        assert_eq!(clients.len(), 2);
        assert!(clients.contains_key("cache"));
        assert!(clients.contains_key("sessions"));

        set.teardown_all().await;
        set.teardown_all().await; // second call is a no-op
    }

    #[test]
    fn test_unknown_plugin_type() {
        let registry = PluginRegistry::new();
        let result = PluginSet::from_configs(
            &registry,
            [("db".to_string(), "orbital".to_string(), json!({}))],
        );
        assert!(matches!(
            result,
            Err(PluginError::UnknownType { key, kind }) if key == "db" && kind == "orbital"
        ));
    }

    #[test]
    fn test_empty_set_is_ready() {
        let set = PluginSet::empty();
        assert!(set.clients().unwrap().is_empty());
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }
}
