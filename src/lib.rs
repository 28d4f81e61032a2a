//! # FluxFlow-RS
//!
//! A declarative HTTP orchestration engine. Operators describe each
//! endpoint as a JSON **flux** — a directed flow of actions, conditions,
//! loops, parallel fan-out, try/catch and returns — and implement the
//! imperative work as registered **action** handlers. The engine loads and
//! validates the definitions, binds each flux to an HTTP route, and
//! interprets its flow over a per-request **context**.
//!
//! ## 🏗️ Architecture
//!
//! - [`flux`]: the flux definition and the six-kind [`flux::FlowNode`] sum
//! - [`validator`]: schema check collecting all errors with dotted paths
//! - [`loader`]: walks the flux root, keeps valid definitions and per-file
//!   error reports
//! - [`interpolate`]: `${path}` resolution against the context (value mode
//!   and string mode)
//! - [`condition`]: the hand-written expression parser behind `condition`
//!   nodes
//! - [`plugin`]: adapter lifecycle (`setup` → `client` → `teardown`) and
//!   the built-in `memory` plugin
//! - [`executor`]: the flow interpreter
//! - [`context`]: per-request state shared across parallel branches
//! - [`router`]: the axum binding, one route per flux
//! - [`engine`]: assembly, startup/shutdown and reload
//! - [`config`]: the JSON config file with `${VAR}` env interpolation
//!
//! ## 🚀 Quick Start
//!
//! ```rust,no_run
//! use fluxflow_rs::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EngineError> {
//!     let engine = FluxEngine::builder()
//!         .config_file("config.json")?
//!         .register_action("users/fetch", |ctx| async move {
//!             let id = ctx.args().and_then(|a| a.get("id").cloned());
//!             Ok(json!({"id": id}))
//!         })
//!         .build()?;
//!     engine.serve().await
//! }
//! ```
//!
//! A matching flux file under the configured `paths.flux` root:
//!
//! ```json
//! {
//!     "endpoint": "/users/:id",
//!     "method": "GET",
//!     "flow": [
//!         {"type": "action", "name": "user", "path": "users/fetch",
//!          "args": {"id": "${input.id}"}},
//!         {"type": "return", "body": "${user}"}
//!     ]
//! }
//! ```
//!
//! ## Response Contract
//!
//! Exactly one HTTP response is written per request: by a `return` node, by
//! the executor's implicit `200 {"success":true}` tail, or — for failures no
//! `try` node caught — an opaque `500 {"error":"Internal server error"}`.

pub mod action;
pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod executor;
pub mod flux;
pub mod interpolate;
pub mod loader;
pub mod plugin;
pub mod router;
pub mod validator;

// ============================================================================
// CORE RE-EXPORTS
// ============================================================================

pub use action::{ActionError, ActionHandler, ActionRegistry};
pub use condition::{ConditionError, evaluate_condition};
pub use config::{EngineConfig, LogLevel};
pub use context::{FluxContext, RequestInfo, StoredResponse};
pub use engine::{EngineError, FluxEngine, FluxEngineBuilder, init_tracing};
pub use executor::{Executor, FlowError};
pub use flux::{FluxDefinition, FlowNode, HttpMethod};
pub use interpolate::{is_truthy, lookup, resolve};
pub use loader::{FluxFileError, FluxLoader, LoadedFluxes};
pub use plugin::{Plugin, PluginClient, PluginError, PluginRegistry, PluginSet};
pub use validator::{ValidationError, ValidationReport, validate};

#[cfg(feature = "memory-plugin")]
pub use plugin::{MemoryClient, MemoryPlugin};

/// Commonly used external type
pub use serde_json::Value as JsonValue;

/// Convenient re-exports for common types and traits
pub mod prelude {
    pub use crate::action::{ActionError, ActionRegistry};
    pub use crate::config::{EngineConfig, LogLevel};
    pub use crate::context::FluxContext;
    pub use crate::engine::{EngineError, FluxEngine, FluxEngineBuilder};
    pub use crate::executor::Executor;
    pub use crate::flux::{FluxDefinition, FlowNode, HttpMethod};
    pub use crate::plugin::{Plugin, PluginError};
    pub use crate::validator::validate;

    #[cfg(feature = "memory-plugin")]
    pub use crate::plugin::MemoryClient;

    pub use serde_json::Value as JsonValue;
}

// ============================================================================
// INTEGRATION TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_validate_then_execute() {
        let raw = json!({
            "endpoint": "/greet",
            "method": "POST",
            "flow": [
                {"type": "action", "name": "greeting", "path": "greet",
                 "args": {"who": "${input.name}"}},
                {"type": "return", "body": "${greeting}"}
            ]
        });

        let report = validate(&raw);
        assert!(report.valid, "unexpected errors: {:?}", report.errors);

        let def: FluxDefinition = serde_json::from_value(raw).unwrap();

        let mut actions = ActionRegistry::new();
        actions.register_fn("greet", |ctx| async move {
            let who = ctx
                .args()
                .and_then(|a| a.get("who").and_then(|w| w.as_str().map(String::from)))
                .unwrap_or_default();
            Ok(json!(format!("hello {}", who)))
        });
        let executor = Executor::new(Arc::new(actions));

        let mut input = Map::new();
        input.insert("name".to_string(), json!("ada"));
        let ctx = Arc::new(FluxContext::new(RequestInfo::default(), input));

        executor.execute_flux(&def, &ctx).await;

        let response = ctx.take_response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!("hello ada"));
    }

    #[test]
    fn test_invalid_definition_is_reported_not_deserialized() {
        let raw = json!({
            "endpoint": "/broken",
            "method": "GET",
            "flow": [{"type": "action", "name": "x"}]
        });

        let report = validate(&raw);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.path == "flow[0].path"));
    }
}
