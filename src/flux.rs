//! # Flux Definitions and Flow Nodes
//!
//! This module provides the data model for FluxFlow: the [`FluxDefinition`]
//! describing one HTTP endpoint, and the [`FlowNode`] sum type describing the
//! flow of control interpreted for each request.
//!
//! ## Core Concepts
//!
//! ### Flux Definition
//! A flux binds an HTTP route `(method, endpoint)` to an ordered sequence of
//! flow nodes. Definitions are parsed from JSON files, validated once at load
//! time, and are immutable afterwards.
//!
//! ### Flow Nodes
//! A flow is a tree built from six node kinds:
//! - **Action**: invoke a registered handler and store its result
//! - **Condition**: branch on a boolean expression
//! - **ForEach**: iterate a resolved array, binding each element
//! - **Parallel**: run several branches concurrently over the shared context
//! - **Try**: catch failures raised inside a sub-flow
//! - **Return**: terminate the flow and write the HTTP response
//!
//! ## Example
//!
//! ```rust
//! use fluxflow_rs::flux::FluxDefinition;
//!
//! let def: FluxDefinition = serde_json::from_value(serde_json::json!({
//!     "endpoint": "/hello",
//!     "method": "GET",
//!     "flow": [
//!         {"type": "action", "name": "r", "path": "hello"},
//!         {"type": "return", "body": "${r}"}
//!     ]
//! })).unwrap();
//!
//! assert_eq!(def.endpoint, "/hello");
//! assert_eq!(def.flow.len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The HTTP verbs a flux may bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,
    HEAD,
}

impl HttpMethod {
    /// All verbs accepted by the validator, in declaration order.
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::GET,
        HttpMethod::POST,
        HttpMethod::PUT,
        HttpMethod::DELETE,
        HttpMethod::PATCH,
        HttpMethod::OPTIONS,
        HttpMethod::HEAD,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::OPTIONS => "OPTIONS",
            HttpMethod::HEAD => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown HTTP method: {}", s))
    }
}

/// One node in a flux's flow tree.
///
/// The JSON representation is tagged by the `type` field. Unknown extra keys
/// on a node are tolerated for forward compatibility; unknown `type` tags are
/// rejected by the validator before deserialization is attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowNode {
    /// Invoke the handler registered at `path`; store the result under `name`.
    #[serde(rename = "action")]
    Action {
        name: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Map<String, Value>>,
    },

    /// Branch on a boolean expression.
    ///
    /// `if` is usually a string mixing `${…}` placeholders with comparison
    /// and logical operators, but any JSON value is accepted and collapses
    /// to truthiness.
    #[serde(rename = "condition")]
    Condition {
        #[serde(rename = "if")]
        condition: Value,
        then: Vec<FlowNode>,
        #[serde(
            default,
            rename = "else",
            skip_serializing_if = "Option::is_none"
        )]
        otherwise: Option<Vec<FlowNode>>,
    },

    /// Iterate the array resolved from `items`, binding each element at `as`.
    #[serde(rename = "forEach")]
    ForEach {
        items: String,
        #[serde(rename = "as")]
        bind: String,
        #[serde(rename = "do")]
        body: Vec<FlowNode>,
    },

    /// Run each branch concurrently over the shared request context.
    #[serde(rename = "parallel")]
    Parallel { branches: Vec<Vec<FlowNode>> },

    /// Catch any failure raised inside `try`.
    #[serde(rename = "try")]
    Try {
        #[serde(rename = "try")]
        body: Vec<FlowNode>,
        catch: Vec<FlowNode>,
        #[serde(
            default,
            rename = "errorVar",
            skip_serializing_if = "Option::is_none"
        )]
        error_var: Option<String>,
    },

    /// Terminate the flow and write the HTTP response.
    #[serde(rename = "return")]
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        body: Value,
    },
}

impl FlowNode {
    /// The `type` tag this node carries in JSON.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowNode::Action { .. } => "action",
            FlowNode::Condition { .. } => "condition",
            FlowNode::ForEach { .. } => "forEach",
            FlowNode::Parallel { .. } => "parallel",
            FlowNode::Try { .. } => "try",
            FlowNode::Return { .. } => "return",
        }
    }
}

impl fmt::Display for FlowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowNode::Action { name, path, .. } => write!(f, "action {} -> {}", path, name),
            FlowNode::Condition { .. } => write!(f, "condition"),
            FlowNode::ForEach { bind, .. } => write!(f, "forEach as {}", bind),
            FlowNode::Parallel { branches } => write!(f, "parallel x{}", branches.len()),
            FlowNode::Try { .. } => write!(f, "try"),
            FlowNode::Return { status, .. } => {
                write!(f, "return {}", status.unwrap_or(200))
            }
        }
    }
}

/// One declarative endpoint: route identity plus the flow interpreted for
/// each request. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxDefinition {
    /// URL pattern using colon-prefixed path parameters (`/users/:id`).
    pub endpoint: String,
    pub method: HttpMethod,
    /// Optional human text; ignored by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub flow: Vec<FlowNode>,
}

impl FluxDefinition {
    /// Route identity: two fluxes with the same key target the same route.
    pub fn route_key(&self) -> (HttpMethod, &str) {
        (self.method, self.endpoint.as_str())
    }
}

impl fmt::Display for FluxDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)
    }
}
