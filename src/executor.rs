//! # Flow Executor
//!
//! The interpreter that walks a flux's flow tree over a request context.
//!
//! ## Execution Model
//!
//! [`Executor::execute_flux`] injects the plugin clients, walks the flow
//! sequentially and guarantees exactly one HTTP response per request:
//! a `return` node writes it, an uncaught failure produces an opaque `500`,
//! and a flow that falls off the end gets the implicit `200 {"success":true}`
//! tail.
//!
//! ## Early Termination
//!
//! Node execution returns a boolean: `true` means a `return` node fired
//! somewhere below and no sibling may run. Parallel branches observe
//! termination cooperatively, at their next node boundary; an in-flight
//! action is never preempted.
//!
//! ## Failure Propagation
//!
//! User failures unwind through `condition`, `forEach` and `parallel`
//! transparently; only `try` catches. A `parallel` node propagates the
//! first failure observed in branch order and never masks it. Failures that
//! reach the top of the flow are logged and answered with
//! `500 {"error":"Internal server error"}` — details never leak into the
//! response.

use crate::action::ActionRegistry;
use crate::condition::evaluate_condition;
use crate::context::FluxContext;
use crate::flux::{FluxDefinition, FlowNode};
use crate::interpolate::{resolve, resolve_string};
use crate::plugin::PluginClient;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Runtime failure inside a flow. Catchable by a `try` node.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("Action not found: {0}")]
    ActionNotFound(String),
    #[error("action '{name}' ({path}) failed: {message}")]
    ActionFailed {
        name: String,
        path: String,
        message: String,
    },
}

impl FlowError {
    /// The message a `try` node binds at `errorVar`: the handler's own
    /// message for action failures, the full text otherwise.
    fn binding_message(&self) -> String {
        match self {
            FlowError::ActionNotFound(path) => format!("Action not found: {}", path),
            FlowError::ActionFailed { message, .. } => message.clone(),
        }
    }

    /// The value bound at `errorVar`, shaped like the source's caught
    /// Error object so `${e.message}` resolves.
    fn to_binding(&self) -> Value {
        json!({ "message": self.binding_message() })
    }
}

/// Interprets flux definitions over request contexts.
///
/// The executor is cheap to share: one instance serves every route, holding
/// the action table and the plugin clients injected into each context.
pub struct Executor {
    actions: Arc<ActionRegistry>,
    clients: HashMap<String, PluginClient>,
}

impl Executor {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self {
            actions,
            clients: HashMap::new(),
        }
    }

    /// Attach the plugin clients copied into every request context.
    pub fn with_plugin_clients(mut self, clients: HashMap<String, PluginClient>) -> Self {
        self.clients = clients;
        self
    }

    /// Interpret `def.flow` over `ctx`. Always leaves exactly one response
    /// in the context.
    pub async fn execute_flux(&self, def: &FluxDefinition, ctx: &Arc<FluxContext>) {
        ctx.set_plugins(self.clients.clone());

        match self.execute_nodes(&def.flow, ctx).await {
            Ok(_) => {
                if !ctx.response_written() {
                    ctx.write_response(200, json!({"success": true}));
                }
            }
            Err(err) => {
                error!(
                    flux = %def,
                    request_id = %ctx.request_id(),
                    error = %err,
                    "uncaught flow failure"
                );
                if !ctx.response_written() {
                    ctx.write_response(500, json!({"error": "Internal server error"}));
                }
            }
        }
    }

    /// Walk a node list in order. Returns `true` when a `return` fired and
    /// the remaining siblings must be skipped.
    fn execute_nodes<'a>(
        &'a self,
        nodes: &'a [FlowNode],
        ctx: &'a Arc<FluxContext>,
    ) -> BoxFuture<'a, Result<bool, FlowError>> {
        async move {
            for node in nodes {
                // Cooperative stop: a return elsewhere (e.g. a sibling
                // parallel branch) halts the walk at the next boundary.
                if ctx.is_terminated() || ctx.response_written() {
                    return Ok(true);
                }
                if self.execute_node(node, ctx).await? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        .boxed()
    }

    async fn execute_node(
        &self,
        node: &FlowNode,
        ctx: &Arc<FluxContext>,
    ) -> Result<bool, FlowError> {
        debug!(node = %node, request_id = %ctx.request_id(), "executing node");

        match node {
            FlowNode::Action { name, path, args } => {
                self.run_action(name, path, args.as_ref(), ctx).await?;
                Ok(false)
            }

            FlowNode::Condition {
                condition,
                then,
                otherwise,
            } => {
                if evaluate_condition(condition, ctx) {
                    self.execute_nodes(then, ctx).await
                } else if let Some(otherwise) = otherwise {
                    self.execute_nodes(otherwise, ctx).await
                } else {
                    Ok(false)
                }
            }

            FlowNode::ForEach { items, bind, body } => {
                let resolved = resolve_string(items, ctx);
                let Value::Array(elements) = resolved else {
                    warn!(items = %items, "forEach items did not resolve to an array");
                    return Ok(false);
                };

                // Sequential by contract: iteration i happens-before i+1.
                let mut outcome = Ok(false);
                for element in elements {
                    ctx.set_binding(bind.clone(), element);
                    match self.execute_nodes(body, ctx).await {
                        Ok(false) => {}
                        other => {
                            outcome = other;
                            break;
                        }
                    }
                }
                ctx.remove_binding(bind);
                outcome
            }

            FlowNode::Parallel { branches } => {
                if branches.is_empty() {
                    return Ok(false);
                }
                #[cfg(feature = "parallel-write-detector")]
                warn_on_overlapping_writes(branches);

                let results =
                    join_all(branches.iter().map(|b| self.execute_nodes(b, ctx))).await;

                let mut terminated = false;
                let mut failure = None;
                for result in results {
                    match result {
                        Ok(t) => terminated |= t,
                        Err(err) if failure.is_none() => failure = Some(err),
                        Err(_) => {}
                    }
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(terminated),
                }
            }

            FlowNode::Try {
                body,
                catch,
                error_var,
            } => {
                match self.execute_nodes(body, ctx).await {
                    // Early return from `try` skips `catch` entirely.
                    Ok(terminated) => Ok(terminated),
                    Err(err) => {
                        debug!(error = %err, "try caught failure");
                        if let Some(var) = error_var {
                            ctx.set_binding(var.clone(), err.to_binding());
                        }
                        // A failure inside `catch` escapes to the enclosing
                        // scope on its own.
                        self.execute_nodes(catch, ctx).await
                    }
                }
            }

            FlowNode::Return { status, body } => {
                let resolved = resolve(body, ctx);
                let status = status.unwrap_or(200);
                if !ctx.write_response(status, resolved) {
                    debug!("response already written; return is a no-op");
                }
                ctx.terminate();
                Ok(true)
            }
        }
    }

    async fn run_action(
        &self,
        name: &str,
        path: &str,
        args: Option<&serde_json::Map<String, Value>>,
        ctx: &Arc<FluxContext>,
    ) -> Result<(), FlowError> {
        let handler = self
            .actions
            .get(path)
            .ok_or_else(|| FlowError::ActionNotFound(path.to_string()))?;

        match args {
            Some(args) => {
                let resolved = resolve(&Value::Object(args.clone()), ctx);
                ctx.set_args(resolved);
            }
            None => ctx.clear_args(),
        }

        let started = Instant::now();
        let result = handler(ctx.clone()).await;
        ctx.clear_args();

        match result {
            Ok(value) => {
                debug!(
                    action = %path,
                    name = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "action completed"
                );
                ctx.set_result(name, value);
                Ok(())
            }
            Err(err) => Err(FlowError::ActionFailed {
                name: name.to_string(),
                path: path.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// Static disjointness check: parallel branches must write disjoint
/// binding names, otherwise the shared context races last-writer-wins.
#[cfg(feature = "parallel-write-detector")]
fn warn_on_overlapping_writes(branches: &[Vec<FlowNode>]) {
    use std::collections::HashSet;

    fn targets(nodes: &[FlowNode], out: &mut HashSet<String>) {
        for node in nodes {
            match node {
                FlowNode::Action { name, .. } => {
                    out.insert(name.clone());
                }
                FlowNode::Condition {
                    then, otherwise, ..
                } => {
                    targets(then, out);
                    if let Some(otherwise) = otherwise {
                        targets(otherwise, out);
                    }
                }
                FlowNode::ForEach { bind, body, .. } => {
                    out.insert(bind.clone());
                    targets(body, out);
                }
                FlowNode::Parallel { branches } => {
                    for branch in branches {
                        targets(branch, out);
                    }
                }
                FlowNode::Try {
                    body,
                    catch,
                    error_var,
                } => {
                    if let Some(var) = error_var {
                        out.insert(var.clone());
                    }
                    targets(body, out);
                    targets(catch, out);
                }
                FlowNode::Return { .. } => {}
            }
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    for branch in branches {
        let mut branch_targets = HashSet::new();
        targets(branch, &mut branch_targets);
        for key in branch_targets {
            if !seen.insert(key.clone()) {
                warn!(
                    binding = %key,
                    "parallel branches write the same binding; last writer wins"
                );
            }
        }
    }
}
