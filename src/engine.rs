//! # Engine Assembly
//!
//! Wires the subsystems into a runnable server. The startup sequence is
//! fixed: logging first, then plugin setup (all plugins must be ready
//! before any endpoint is registered), then the flux load, then route
//! binding. Shutdown tears every plugin down exactly once, whether the
//! server stopped on Ctrl-C or through the shutdown handle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fluxflow_rs::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), EngineError> {
//! let engine = FluxEngine::builder()
//!     .config(EngineConfig::default())
//!     .register_action("hello", |_ctx| async move { Ok(json!({"message": "hi"})) })
//!     .build()?;
//! engine.serve().await
//! # }
//! ```

use crate::action::{ActionError, ActionRegistry};
use crate::config::{ConfigError, EngineConfig, LogLevel};
use crate::context::FluxContext;
use crate::executor::Executor;
use crate::loader::{FluxFileError, FluxLoader, LoadedFluxes};
use crate::plugin::{Plugin, PluginError, PluginRegistry, PluginSet};
use crate::router::build_router;
use axum::Router;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Fatal startup or serve failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error("server failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Install a global tracing subscriber honouring the configured level.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter())),
        )
        .try_init();
}

/// Builder collecting configuration, actions and plugin types.
pub struct FluxEngineBuilder {
    config: EngineConfig,
    actions: ActionRegistry,
    plugin_types: PluginRegistry,
}

impl FluxEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a JSON file with `${VAR}` interpolation.
    pub fn config_file(mut self, path: impl AsRef<std::path::Path>) -> Result<Self, EngineError> {
        self.config = EngineConfig::from_file(path)?;
        Ok(self)
    }

    /// Register one action handler under its flux-visible path.
    pub fn register_action<F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<FluxContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.actions.register_fn(path, handler);
        self
    }

    /// Register a plugin implementation for a config `type` discriminator.
    pub fn register_plugin_type<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.plugin_types.register(kind, factory);
        self
    }

    /// Instantiate every configured plugin and assemble the engine.
    /// An unknown plugin `type` is a startup failure.
    pub fn build(self) -> Result<FluxEngine, EngineError> {
        let plugins = if self.config.plugins.is_empty() {
            PluginSet::empty()
        } else {
            PluginSet::from_configs(
                &self.plugin_types,
                self.config
                    .plugins
                    .iter()
                    .map(|(key, p)| (key.clone(), p.kind.clone(), p.opts_value())),
            )?
        };

        let loader = FluxLoader::new(self.config.paths.flux.clone());

        Ok(FluxEngine {
            config: self.config,
            actions: Arc::new(self.actions),
            plugins,
            loader,
            loaded: RwLock::new(LoadedFluxes::default()),
            shutdown: CancellationToken::new(),
        })
    }
}

/// The assembled engine: plugin set, action table, flux loader and server
/// lifecycle.
pub struct FluxEngine {
    config: EngineConfig,
    actions: Arc<ActionRegistry>,
    plugins: PluginSet,
    loader: FluxLoader,
    loaded: RwLock<LoadedFluxes>,
    shutdown: CancellationToken,
}

impl FluxEngine {
    pub fn builder() -> FluxEngineBuilder {
        FluxEngineBuilder {
            config: EngineConfig::default(),
            actions: ActionRegistry::new(),
            plugin_types: PluginRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that stops a running [`FluxEngine::serve`] from the outside.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Validation failures of the latest load, per file. An external
    /// `validate` front-end maps a non-empty list to exit code 1.
    pub fn flux_errors(&self) -> Vec<FluxFileError> {
        self.read_loaded().errors.clone()
    }

    /// Re-read the flux root and swap the definition table atomically.
    ///
    /// Routes already bound by a running server keep serving their original
    /// definitions; table consumers (listing, validation) see the new load.
    pub fn reload(&self) -> LoadedFluxes {
        let loaded = self.loader.load();
        *self
            .loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner) = loaded.clone();
        loaded
    }

    /// Run plugin setup and the initial flux load, then build the router.
    ///
    /// Exposed separately from [`FluxEngine::serve`] so embedders and tests
    /// can drive the router without binding a socket.
    pub async fn prepare(&mut self) -> Result<Router, EngineError> {
        init_tracing(self.config.logging.level);

        if let Some(actions_root) = &self.config.paths.actions {
            info!(
                root = %actions_root.display(),
                registered = self.actions.len(),
                "actions are registered in code; paths.actions is informational"
            );
        }

        self.plugins.setup_all().await?;
        let clients = self.plugins.clients()?;
        info!(plugins = self.plugins.len(), "plugins ready");

        let loaded = self.loader.load();
        for failure in &loaded.errors {
            error!(
                file = %failure.file.display(),
                errors = failure.errors.len(),
                "flux failed validation and was not registered"
            );
        }

        let executor = Arc::new(
            Executor::new(self.actions.clone()).with_plugin_clients(clients),
        );
        let router = build_router(
            &loaded.definitions,
            executor,
            self.config.server.cors.as_ref(),
        );

        *self
            .loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner) = loaded;

        Ok(router)
    }

    /// Prepare, bind and serve until Ctrl-C or the shutdown handle fires,
    /// then tear the plugins down.
    pub async fn serve(mut self) -> Result<(), EngineError> {
        let router = self.prepare().await?;

        let addr = self.config.server.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| EngineError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(addr = %addr, "server listening");

        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                info!("shutdown requested");
            })
            .await
            .map_err(EngineError::Serve);

        self.plugins.teardown_all().await;
        info!("engine stopped");
        result
    }

    fn read_loaded(&self) -> std::sync::RwLockReadGuard<'_, LoadedFluxes> {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner)
    }
}
