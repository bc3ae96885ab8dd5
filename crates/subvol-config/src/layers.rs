// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Sources of configuration layers, all expressed as JSON objects so they can
//! be merged without knowing the field set.

use std::path::Path;

use serde_json::Value as J;

use crate::error::ConfigError;

/// Prefix of environment variables read as configuration
pub const ENV_PREFIX: &str = "SUBVOL";

/// Read a TOML file into a JSON object.
pub fn file_layer(path: &Path) -> Result<J, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_toml(content: &str) -> Result<J, toml::de::Error> {
    let table: toml::Table = toml::from_str(content)?;
    Ok(toml_to_json(toml::Value::Table(table)))
}

fn toml_to_json(value: toml::Value) -> J {
    match value {
        toml::Value::String(s) => J::String(s),
        toml::Value::Integer(i) => J::from(i),
        toml::Value::Float(f) => J::from(f),
        toml::Value::Boolean(b) => J::Bool(b),
        toml::Value::Datetime(dt) => J::String(dt.to_string()),
        toml::Value::Array(items) => J::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => J::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

/// Overlay from `SUBVOL_*` variables: `SUBVOL_SEARCH_BUFFER_SIZE=4096`
/// becomes `search-buffer-size = 4096`.
///
/// `source` replaces the process environment when given.
pub fn env_layer(source: Option<config::Map<String, String>>) -> Result<J, ConfigError> {
    let built = config::Config::builder()
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true)
                .source(source),
        )
        .build()?;
    let flat = built.try_deserialize::<serde_json::Map<String, J>>()?;
    Ok(J::Object(
        flat.into_iter()
            .map(|(key, value)| (key.to_lowercase().replace('_', "-"), value))
            .collect(),
    ))
}

/// Overlay from command-line flags given as `(kebab-key, value)` pairs.
pub fn flags_layer(pairs: &[(&str, J)]) -> J {
    let mut root = J::Object(Default::default());
    for (key, value) in pairs {
        insert_dotted(&mut root, key, value.clone());
    }
    root
}

/// Merge `layer` into `base`: objects recursively, everything else replaces,
/// nulls in `layer` leave `base` untouched.
pub fn merge_two_json(base: &mut J, layer: J) {
    match (base, layer) {
        (J::Object(a), J::Object(b)) => {
            for (k, v) in b {
                merge_two_json(a.entry(k).or_insert(J::Null), v);
            }
        }
        (_, J::Null) => {}
        (a, b) => *a = b,
    }
}

/// Insert `value` at a dotted path, creating intermediate objects.
pub fn insert_dotted(root: &mut J, dotted: &str, value: J) {
    let mut cur = root;
    let mut parts = dotted.split('.').peekable();
    while let Some(part) = parts.next() {
        if !cur.is_object() {
            *cur = J::Object(Default::default());
        }
        let Some(map) = cur.as_object_mut() else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        cur = map
            .entry(part.to_string())
            .or_insert_with(|| J::Object(Default::default()));
    }
}
