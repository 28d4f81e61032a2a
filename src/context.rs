//! # Request Context
//!
//! The per-request mutable state carried through a flow. A context is
//! created when an HTTP request enters, shared (behind an [`std::sync::Arc`])
//! between the parallel branches of that request, and dropped after the
//! response is flushed.
//!
//! Following the engine's data model, the context is a small typed core plus
//! a single `bindings` map holding everything user flows can address with
//! `${…}` paths: the merged `input` bag, the `results` of completed actions,
//! the free-form `state` scratch space, and the dynamic top-level bindings
//! (action names, `forEach` variables, error vars).
//!
//! Parallel branches share one context. Reads are safe; branches that write
//! the same binding race with last-writer-wins semantics, which is the flux
//! author's responsibility to avoid.

use crate::plugin::PluginClient;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// Binding keys reserved by the engine.
pub const INPUT_KEY: &str = "input";
pub const RESULTS_KEY: &str = "results";
pub const STATE_KEY: &str = "state";

/// Opaque handle to the HTTP request that created this context.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// The response captured by a `return` node (or the executor's implicit
/// tail), rendered to HTTP by the router once the flow finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: Value,
}

/// Per-request mutable state shared by every node of one flow run.
pub struct FluxContext {
    request: RequestInfo,
    request_id: String,
    bindings: RwLock<Map<String, Value>>,
    plugins: RwLock<HashMap<String, PluginClient>>,
    args: Mutex<Option<Value>>,
    response: Mutex<Option<StoredResponse>>,
    terminated: AtomicBool,
    cancellation: CancellationToken,
}

impl FluxContext {
    /// Create a context with an already-merged `input` bag.
    pub fn new(request: RequestInfo, input: Map<String, Value>) -> Self {
        let mut bindings = Map::new();
        bindings.insert(INPUT_KEY.to_string(), Value::Object(input));
        bindings.insert(RESULTS_KEY.to_string(), Value::Object(Map::new()));
        bindings.insert(STATE_KEY.to_string(), Value::Object(Map::new()));

        Self {
            request,
            request_id: uuid::Uuid::new_v4().to_string(),
            bindings: RwLock::new(bindings),
            plugins: RwLock::new(HashMap::new()),
            args: Mutex::new(None),
            response: Mutex::new(None),
            terminated: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
        }
    }

    /// Shallow-merge body, query and path parameters into one `input` bag.
    /// Later sources win on key collision: `{...body, ...query, ...params}`.
    pub fn merge_input(
        body: Value,
        query: HashMap<String, String>,
        params: HashMap<String, String>,
    ) -> Map<String, Value> {
        let mut input = Map::new();
        if let Value::Object(fields) = body {
            input.extend(fields);
        }
        for (k, v) in query {
            input.insert(k, Value::String(v));
        }
        for (k, v) in params {
            input.insert(k, Value::String(v));
        }
        input
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Unique id for this request, attached to tracing spans.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    // ── Bindings ───────────────────────────────────────────────────────────

    /// Read a top-level binding by exact key.
    pub fn binding(&self, key: &str) -> Option<Value> {
        self.read_bindings().get(key).cloned()
    }

    /// Write a top-level binding, replacing any previous value.
    pub fn set_binding(&self, key: impl Into<String>, value: Value) {
        self.write_bindings().insert(key.into(), value);
    }

    /// Remove a top-level binding, returning it if it existed.
    pub fn remove_binding(&self, key: &str) -> Option<Value> {
        self.write_bindings().remove(key)
    }

    /// Store an action result: written to `results[name]` and mirrored at
    /// the top-level binding `name` in one critical section.
    pub fn set_result(&self, name: &str, value: Value) {
        let mut bindings = self.write_bindings();
        match bindings.get_mut(RESULTS_KEY) {
            Some(Value::Object(results)) => {
                results.insert(name.to_string(), value.clone());
            }
            _ => {
                let mut results = Map::new();
                results.insert(name.to_string(), value.clone());
                bindings.insert(RESULTS_KEY.to_string(), Value::Object(results));
            }
        }
        bindings.insert(name.to_string(), value);
    }

    /// Read one action result from `results`.
    pub fn result(&self, name: &str) -> Option<Value> {
        match self.read_bindings().get(RESULTS_KEY) {
            Some(Value::Object(results)) => results.get(name).cloned(),
            _ => None,
        }
    }

    /// Snapshot of every top-level binding key currently set.
    pub fn binding_keys(&self) -> Vec<String> {
        self.read_bindings().keys().cloned().collect()
    }

    // ── Action arguments ───────────────────────────────────────────────────

    /// Arguments of the currently executing action, if any.
    pub fn args(&self) -> Option<Value> {
        self.lock_args().clone()
    }

    pub fn set_args(&self, args: Value) {
        *self.lock_args() = Some(args);
    }

    pub fn clear_args(&self) {
        *self.lock_args() = None;
    }

    // ── Plugins ────────────────────────────────────────────────────────────

    /// Replace the plugin client map. Called once by the executor before the
    /// flow starts.
    pub fn set_plugins(&self, clients: HashMap<String, PluginClient>) {
        *self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner) = clients;
    }

    /// The opaque client exposed by the plugin registered under `name`.
    pub fn plugin(&self, name: &str) -> Option<PluginClient> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Typed access to a plugin client.
    pub fn plugin_as<T: Send + Sync + 'static>(&self, name: &str) -> Option<std::sync::Arc<T>> {
        self.plugin(name).and_then(|c| c.downcast::<T>().ok())
    }

    // ── Response ───────────────────────────────────────────────────────────

    /// Record the HTTP response. The slot is one-shot: the first write wins
    /// and later writes return `false` without effect.
    pub fn write_response(&self, status: u16, body: Value) -> bool {
        let mut slot = self
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(StoredResponse { status, body });
        true
    }

    pub fn response_written(&self) -> bool {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Take the recorded response out of the context for rendering.
    pub fn take_response(&self) -> Option<StoredResponse> {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    // ── Flow control ───────────────────────────────────────────────────────

    /// Signal that a `return` node fired. Sibling parallel branches observe
    /// this at their next node boundary and stop cooperatively.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Token the surrounding HTTP framework cancels when the client goes
    /// away; long-running actions may observe it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    fn read_bindings(&self) -> std::sync::RwLockReadGuard<'_, Map<String, Value>> {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_bindings(&self) -> std::sync::RwLockWriteGuard<'_, Map<String, Value>> {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_args(&self) -> std::sync::MutexGuard<'_, Option<Value>> {
        self.args.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FluxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluxContext")
            .field("request_id", &self.request_id)
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("terminated", &self.is_terminated())
            .field("response_written", &self.response_written())
            .finish()
    }
}
