//! # Flux Loader
//!
//! Populates the in-memory flux table from a configured root directory, at
//! startup and again on reload. The loader walks the root recursively for
//! `.json` files, parses each, runs the validator, and keeps only the
//! definitions that validate. Invalid files never abort a load: they are
//! collected per file so a `validate` front-end can report them and map the
//! outcome to an exit code.
//!
//! Filenames are informational; route identity is `(method, endpoint)`.
//! When two files declare the same route the one walked last wins and a
//! warning names both.

use crate::flux::{FluxDefinition, HttpMethod};
use crate::validator::{self, ValidationError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// All validation problems of one flux file.
#[derive(Debug, Clone)]
pub struct FluxFileError {
    pub file: PathBuf,
    pub errors: Vec<ValidationError>,
}

/// Result of one load pass over the flux root.
#[derive(Debug, Clone, Default)]
pub struct LoadedFluxes {
    pub definitions: Vec<Arc<FluxDefinition>>,
    pub errors: Vec<FluxFileError>,
}

impl LoadedFluxes {
    /// `true` when every discovered file validated.
    pub fn all_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Walks a flux root and produces the definition table.
#[derive(Debug, Clone)]
pub struct FluxLoader {
    root: PathBuf,
}

impl FluxLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One full load pass: discover, parse, validate, dedupe.
    pub fn load(&self) -> LoadedFluxes {
        let mut loaded = LoadedFluxes::default();

        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "flux root does not exist; no routes loaded");
            return loaded;
        }

        let mut files = Vec::new();
        collect_json_files(&self.root, &mut files);
        files.sort();

        let mut by_route: HashMap<(HttpMethod, String), usize> = HashMap::new();
        for file in files {
            match self.load_file(&file) {
                Ok(def) => {
                    debug!(file = %file.display(), flux = %def, "flux loaded");
                    let key = (def.method, def.endpoint.clone());
                    let def = Arc::new(def);
                    if let Some(&index) = by_route.get(&key) {
                        warn!(
                            file = %file.display(),
                            route = %def,
                            "duplicate route definition; later file replaces earlier one"
                        );
                        loaded.definitions[index] = def;
                    } else {
                        by_route.insert(key, loaded.definitions.len());
                        loaded.definitions.push(def);
                    }
                }
                Err(errors) => {
                    warn!(
                        file = %file.display(),
                        count = errors.len(),
                        "invalid flux definition skipped"
                    );
                    loaded.errors.push(FluxFileError { file, errors });
                }
            }
        }

        info!(
            routes = loaded.definitions.len(),
            invalid = loaded.errors.len(),
            root = %self.root.display(),
            "flux definitions loaded"
        );
        loaded
    }

    fn load_file(&self, file: &Path) -> Result<FluxDefinition, Vec<ValidationError>> {
        let text = fs::read_to_string(file).map_err(|err| {
            vec![ValidationError {
                path: String::new(),
                message: format!("could not read file: {}", err),
            }]
        })?;

        let value: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
            vec![ValidationError {
                path: String::new(),
                message: format!("invalid JSON: {}", err),
            }]
        })?;

        let report = validator::validate(&value);
        if !report.valid {
            return Err(report.errors);
        }

        serde_json::from_value(value).map_err(|err| {
            vec![ValidationError {
                path: String::new(),
                message: format!("definition did not deserialize: {}", err),
            }]
        })
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "could not read flux directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write_flux(dir: &Path, name: &str, value: serde_json::Value) {
        fs::write(dir.join(name), serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_missing_root_yields_empty_table() {
        let loader = FluxLoader::new("/definitely/not/a/real/flux/root");
        let loaded = loader.load();
        assert!(loaded.definitions.is_empty());
        assert!(loaded.errors.is_empty());
        assert!(loaded.all_valid());
    }

    #[test]
    fn test_valid_definitions_survive_invalid_neighbours() {
        let dir = tempfile::tempdir().unwrap();
        write_flux(
            dir.path(),
            "hello.json",
            json!({
                "endpoint": "/hello", "method": "GET",
                "flow": [{"type": "return", "body": "hi"}]
            }),
        );
        write_flux(
            dir.path(),
            "broken.json",
            json!({
                "endpoint": "/broken", "method": "GET",
                "flow": [{"type": "action", "name": "x"}]
            }),
        );
        fs::write(dir.path().join("garbage.json"), "{not json").unwrap();
        fs::write(dir.path().join("ignored.txt"), "not a flux").unwrap();

        let loaded = FluxLoader::new(dir.path()).load();

        assert_eq!(loaded.definitions.len(), 1);
        assert_eq!(loaded.definitions[0].endpoint, "/hello");
        assert_eq!(loaded.errors.len(), 2);
        assert!(!loaded.all_valid());

        let broken = loaded
            .errors
            .iter()
            .find(|e| e.file.ends_with("broken.json"))
            .unwrap();
        assert_eq!(broken.errors[0].path, "flow[0].path");
    }

    #[test]
    fn test_nested_directories_are_walked() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("v1").join("users");
        fs::create_dir_all(&nested).unwrap();
        write_flux(
            &nested,
            "list.json",
            json!({
                "endpoint": "/v1/users", "method": "GET",
                "flow": [{"type": "return", "body": []}]
            }),
        );

        let loaded = FluxLoader::new(dir.path()).load();
        assert_eq!(loaded.definitions.len(), 1);
        assert_eq!(loaded.definitions[0].endpoint, "/v1/users");
    }

    #[test]
    fn test_duplicate_route_last_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_flux(
            dir.path(),
            "a.json",
            json!({
                "endpoint": "/dup", "method": "GET",
                "flow": [{"type": "return", "body": "from a"}]
            }),
        );
        write_flux(
            dir.path(),
            "b.json",
            json!({
                "endpoint": "/dup", "method": "GET",
                "flow": [{"type": "return", "body": "from b"}]
            }),
        );

        let loaded = FluxLoader::new(dir.path()).load();
        assert_eq!(loaded.definitions.len(), 1);
        match &loaded.definitions[0].flow[0] {
            crate::flux::FlowNode::Return { body, .. } => {
                assert_eq!(body, &json!("from b"));
            }
            other => panic!("unexpected node {}", other),
        }
    }

    #[test]
    fn test_same_endpoint_different_methods_coexist() {
        let dir = tempfile::tempdir().unwrap();
        for method in ["GET", "POST"] {
            write_flux(
                dir.path(),
                &format!("{}.json", method.to_lowercase()),
                json!({
                    "endpoint": "/users", "method": method,
                    "flow": [{"type": "return", "body": method}]
                }),
            );
        }

        let loaded = FluxLoader::new(dir.path()).load();
        assert_eq!(loaded.definitions.len(), 2);
    }
}
