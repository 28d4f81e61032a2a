//! # Flux Validator
//!
//! Schema-driven validation of parsed flux JSON. The validator works on raw
//! [`serde_json::Value`] trees so that every problem in a file can be
//! reported at once with a dotted path (`flow[2].then[0].path`), instead of
//! stopping at the first deserialization failure.
//!
//! Validation is deliberately forward-compatible: unknown keys at the root
//! or on a node are tolerated, only unknown `type` tags and missing or
//! mistyped mandatory fields are errors.

use crate::flux::HttpMethod;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A single validation problem: where it is and what is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Dotted path into the definition, e.g. `flow[0].then[1].name`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Outcome of validating one definition. All errors are collected; there is
/// no fail-fast.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validate a parsed flux definition against the flux JSON schema.
pub fn validate(value: &Value) -> ValidationReport {
    let mut errors = Vec::new();

    let Some(root) = value.as_object() else {
        errors.push(ValidationError {
            path: String::new(),
            message: "flux definition must be a JSON object".to_string(),
        });
        return ValidationReport::from_errors(errors);
    };

    match root.get("endpoint") {
        None => push(&mut errors, "endpoint", "missing required field"),
        Some(v) if !v.is_string() => push(&mut errors, "endpoint", "must be a string"),
        _ => {}
    }

    match root.get("method") {
        None => push(&mut errors, "method", "missing required field"),
        Some(Value::String(s)) => {
            if HttpMethod::from_str(s).is_err() {
                push(
                    &mut errors,
                    "method",
                    &format!(
                        "unknown method '{}', expected one of {}",
                        s,
                        HttpMethod::ALL.map(|m| m.as_str()).join(", ")
                    ),
                );
            }
        }
        Some(_) => push(&mut errors, "method", "must be a string"),
    }

    match root.get("flow") {
        None => push(&mut errors, "flow", "missing required field"),
        Some(Value::Array(nodes)) => {
            for (i, node) in nodes.iter().enumerate() {
                validate_node(node, &format!("flow[{}]", i), &mut errors);
            }
        }
        Some(_) => push(&mut errors, "flow", "must be an array of flow nodes"),
    }

    ValidationReport::from_errors(errors)
}

fn push(errors: &mut Vec<ValidationError>, path: &str, message: &str) {
    errors.push(ValidationError {
        path: path.to_string(),
        message: message.to_string(),
    });
}

fn validate_node(value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    let Some(node) = value.as_object() else {
        push(errors, path, "flow node must be a JSON object");
        return;
    };

    let kind = match node.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            push(errors, &format!("{}.type", path), "must be a string");
            return;
        }
        None => {
            push(errors, &format!("{}.type", path), "missing required field");
            return;
        }
    };

    match kind {
        "action" => {
            require_string(node.get("name"), &format!("{}.name", path), errors);
            require_string(node.get("path"), &format!("{}.path", path), errors);
            if let Some(args) = node.get("args") {
                if !args.is_object() {
                    push(errors, &format!("{}.args", path), "must be an object");
                }
            }
        }
        "condition" => {
            if node.get("if").is_none() {
                push(errors, &format!("{}.if", path), "missing required field");
            }
            require_node_array(node.get("then"), &format!("{}.then", path), errors);
            if let Some(v) = node.get("else") {
                validate_node_array(v, &format!("{}.else", path), errors);
            }
        }
        "forEach" => {
            require_string(node.get("items"), &format!("{}.items", path), errors);
            require_string(node.get("as"), &format!("{}.as", path), errors);
            require_node_array(node.get("do"), &format!("{}.do", path), errors);
        }
        "parallel" => match node.get("branches") {
            None => push(
                errors,
                &format!("{}.branches", path),
                "missing required field",
            ),
            Some(Value::Array(branches)) => {
                for (i, branch) in branches.iter().enumerate() {
                    validate_node_array(branch, &format!("{}.branches[{}]", path, i), errors);
                }
            }
            Some(_) => push(
                errors,
                &format!("{}.branches", path),
                "must be an array of node arrays",
            ),
        },
        "try" => {
            require_node_array(node.get("try"), &format!("{}.try", path), errors);
            require_node_array(node.get("catch"), &format!("{}.catch", path), errors);
            if let Some(v) = node.get("errorVar") {
                if !v.is_string() {
                    push(errors, &format!("{}.errorVar", path), "must be a string");
                }
            }
        }
        "return" => {
            if node.get("body").is_none() {
                push(errors, &format!("{}.body", path), "missing required field");
            }
        }
        other => push(
            errors,
            &format!("{}.type", path),
            &format!("unknown node type '{}'", other),
        ),
    }
}

fn require_string(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) {
    match value {
        None => push(errors, path, "missing required field"),
        Some(v) if !v.is_string() => push(errors, path, "must be a string"),
        _ => {}
    }
}

fn require_node_array(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) {
    match value {
        None => push(errors, path, "missing required field"),
        Some(v) => validate_node_array(v, path, errors),
    }
}

fn validate_node_array(value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    match value {
        Value::Array(nodes) => {
            for (i, node) in nodes.iter().enumerate() {
                validate_node(node, &format!("{}[{}]", path, i), errors);
            }
        }
        _ => push(errors, path, "must be an array of flow nodes"),
    }
}
