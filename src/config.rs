//! # Engine Configuration
//!
//! The JSON config file consumed at startup: server binding and CORS,
//! content roots, log level and the plugin table. Before deserialization
//! every string is passed through `${VAR}` environment interpolation; a
//! placeholder that is the entire string keeps its native type when the
//! value parses as a JSON scalar, so `"port": "${PORT}"` yields a number.
//!
//! The engine consumes already-resolved configuration: reading `.env`
//! files is a front-end concern and out of scope here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Root configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Logical plugin key → `{type, …opts}`. Ordered so plugin setup is
    /// deterministic.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginConfig>,
}

impl EngineConfig {
    /// Read, env-interpolate and deserialize a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&text)
    }

    /// Parse config from JSON text, applying environment interpolation.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let mut value: Value = serde_json::from_str(text)?;
        interpolate_env(&mut value, &|name| std::env::var(name).ok());
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: None,
            cors: None,
        }
    }
}

impl ServerConfig {
    /// The socket address the server binds.
    pub fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or("0.0.0.0"),
            self.port
        )
    }
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_flux_root")]
    pub flux: PathBuf,
    /// Accepted for compatibility with the original layout; actions are
    /// registered in code, so this is only reported at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            flux: default_flux_root(),
            actions: None,
        }
    }
}

fn default_flux_root() -> PathBuf {
    PathBuf::from("flux")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// CORS settings mapped onto the router's `tower-http` layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<CorsOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

/// `origin` accepts a single origin, a list, or a boolean (`true` = any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    Any(bool),
    One(String),
    Many(Vec<String>),
}

/// One plugin entry: the `type` discriminator plus adapter options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub opts: Map<String, Value>,
}

impl PluginConfig {
    pub fn opts_value(&self) -> Value {
        Value::Object(self.opts.clone())
    }
}

/// Substitute `${VAR}` placeholders from an environment source.
///
/// A string that is exactly one placeholder takes the variable's native
/// type when it parses as a JSON scalar; embedded placeholders substitute
/// textually. Unset variables leave the placeholder unchanged with a
/// warning.
pub fn interpolate_env(value: &mut Value, env: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) if s.contains("${") => {
            if let Some(name) = full_placeholder(s) {
                match env(name) {
                    Some(text) => *value = scalar_from_env(&text),
                    None => warn!(var = %name, "environment variable not set"),
                }
                return;
            }
            *value = Value::String(substitute_embedded(s, env));
        }
        Value::Array(items) => {
            for item in items {
                interpolate_env(item, env);
            }
        }
        Value::Object(fields) => {
            for (_, field) in fields.iter_mut() {
                interpolate_env(field, env);
            }
        }
        _ => {}
    }
}

fn full_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    (!inner.is_empty() && !inner.contains('}')).then_some(inner)
}

fn substitute_embedded(s: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env(name) {
                    Some(text) => out.push_str(&text),
                    None => {
                        warn!(var = %name, "environment variable not set");
                        out.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Numbers, booleans and `null` keep their native type; everything else
/// stays a string.
fn scalar_from_env(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
        _ => Value::String(text.to_string()),
    }
}
