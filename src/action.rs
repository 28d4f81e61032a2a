//! # Action Registry
//!
//! Actions are the imperative units of work a flow invokes by path. The
//! source system discovered them by walking a scripts directory; in a
//! compiled engine they are registered at startup instead, under the same
//! `/`-separated, extension-free keys the flux definitions refer to
//! (`"users/fetch"`).
//!
//! A handler receives the shared request context and returns any JSON
//! value. While it runs, its resolved `args` are available through
//! [`FluxContext::args`](crate::context::FluxContext::args); the executor
//! clears them on both the normal and the error exit path.
//!
//! ## Example
//!
//! ```rust
//! use fluxflow_rs::action::ActionRegistry;
//! use serde_json::json;
//!
//! let mut actions = ActionRegistry::new();
//! actions.register_fn("hello", |_ctx| async move {
//!     Ok(json!({"message": "hi"}))
//! });
//! assert!(actions.get("hello").is_some());
//! ```

use crate::context::FluxContext;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by user action code.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// A plain failure message; this is what a `try` node binds at
    /// `errorVar` as `{"message": …}`.
    #[error("{0}")]
    Message(String),
}

impl ActionError {
    pub fn msg(message: impl Into<String>) -> Self {
        ActionError::Message(message.into())
    }
}

impl From<String> for ActionError {
    fn from(s: String) -> Self {
        ActionError::Message(s)
    }
}

impl From<&str> for ActionError {
    fn from(s: &str) -> Self {
        ActionError::Message(s.to_string())
    }
}

/// The boxed future returned by an action handler.
pub type ActionFuture = BoxFuture<'static, Result<Value, ActionError>>;

/// A callable unit of user-provided work.
pub type ActionHandler = Arc<dyn Fn(Arc<FluxContext>) -> ActionFuture + Send + Sync>;

/// Map from action path to handler.
///
/// Keys are normalised on registration and lookup: `\` separators become
/// `/` and a leading `/` is stripped, so `"users/fetch"`,
/// `"/users/fetch"` and `"users\fetch"` all address the same handler.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a boxed handler under `path`, replacing any previous one.
    pub fn register(&mut self, path: impl Into<String>, handler: ActionHandler) {
        self.handlers.insert(normalize(&path.into()), handler);
    }

    /// Register a plain async closure.
    pub fn register_fn<F, Fut>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(Arc<FluxContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        let handler =
            Arc::new(move |ctx: Arc<FluxContext>| Box::pin(handler(ctx)) as ActionFuture);
        self.handlers.insert(normalize(&path.into()), handler);
    }

    /// Look up a handler by path. `None` means the flow fails with
    /// "Action not found".
    pub fn get(&self, path: &str) -> Option<ActionHandler> {
        self.handlers.get(&normalize(path)).cloned()
    }

    /// Registered paths, sorted, for startup diagnostics.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handlers.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}
