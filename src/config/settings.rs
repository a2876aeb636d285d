//! Layered settings store.
//!
//! Values are resolved from four layers, in ascending precedence:
//! defaults → configuration file → environment → explicit overrides.
//! Keys are dotted paths (`rpc.tls.enabled`); the environment variable for a
//! key is the uppercase application name followed by the key with `.`
//! replaced by `_` (`ECHOCTL_RPC_TLS_ENABLED`).

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::{Table, Value};

use crate::config::loader::{load_file, ConfigError};

/// Hierarchical configuration source shared by all modules.
#[derive(Debug, Clone)]
pub struct Settings {
    env_prefix: String,
    defaults: Table,
    file: Table,
    overrides: Table,
    file_path: Option<PathBuf>,
}

impl Settings {
    /// Create an empty settings store for `app_name`.
    pub fn new(app_name: &str) -> Self {
        Self {
            env_prefix: app_name.to_uppercase().replace('-', "_"),
            defaults: Table::new(),
            file: Table::new(),
            overrides: Table::new(),
            file_path: None,
        }
    }

    /// Prefix used for environment variable lookups.
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Environment variable consulted for `key`.
    pub fn env_var_name(&self, key: &str) -> String {
        format!("{}_{}", self.env_prefix, key.replace('.', "_").to_uppercase())
    }

    /// Use `path` as the backing configuration file. The file is read on the
    /// next [`Settings::refresh`].
    pub fn set_file(&mut self, path: impl Into<PathBuf>) {
        self.file_path = Some(path.into());
    }

    /// Configuration file currently backing the file layer, if any.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Re-read the backing file, replacing the file layer. A store without a
    /// file is left untouched.
    pub fn refresh(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = &self.file_path {
            self.file = load_file(path)?;
        }
        Ok(())
    }

    /// Replace the file layer with inline TOML content.
    pub fn load_str(&mut self, content: &str) -> Result<(), ConfigError> {
        self.file = content
            .parse::<Table>()
            .map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        Ok(())
    }

    /// Register the default value for `key`.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        insert(&mut self.defaults, key, value.into());
    }

    /// Explicitly set `key`, overriding every other layer.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        insert(&mut self.overrides, key, value.into());
    }

    /// Resolved value for a dotted `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        lookup(&self.resolve(), key).cloned()
    }

    /// Deserialize the subtree under `key`. Returns `None` when the subtree is
    /// absent from every layer.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let resolved = self.resolve();
        let Some(value) = lookup(&resolved, key) else {
            return Ok(None);
        };
        value
            .clone()
            .try_into::<T>()
            .map(Some)
            .map_err(|source| ConfigError::Deserialize {
                key: key.to_string(),
                source,
            })
    }

    /// Merge all layers into a single table.
    ///
    /// Environment variables only apply to keys already known from the
    /// defaults or the file; their raw text is converted to the type of the
    /// value they replace.
    pub fn resolve(&self) -> Table {
        let mut merged = self.defaults.clone();
        merge_into(&mut merged, &self.file);

        let mut keys = Vec::new();
        leaf_keys(&merged, "", &mut keys);
        for key in keys {
            let Ok(raw) = std::env::var(self.env_var_name(&key)) else {
                continue;
            };
            let value = lookup(&merged, &key).map(|current| parse_env_value(&raw, current));
            if let Some(value) = value {
                insert(&mut merged, &key, value);
            }
        }

        merge_into(&mut merged, &self.overrides);
        merged
    }
}

fn lookup<'a>(table: &'a Table, key: &str) -> Option<&'a Value> {
    let mut segments = key.split('.');
    let mut current = table.get(segments.next()?)?;
    for segment in segments {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

fn insert(table: &mut Table, key: &str, value: Value) {
    let segments: Vec<&str> = key.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert(Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        let Value::Table(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

fn merge_into(base: &mut Table, overlay: &Table) {
    for (key, value) in overlay {
        if let (Some(Value::Table(existing)), Value::Table(incoming)) = (base.get_mut(key), value) {
            merge_into(existing, incoming);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}

fn leaf_keys(table: &Table, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Table(inner) => leaf_keys(inner, &full, out),
            _ => out.push(full),
        }
    }
}

fn parse_env_value(raw: &str, current: &Value) -> Value {
    let text = || Value::String(raw.to_string());
    match current {
        Value::Boolean(_) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" => Value::Boolean(true),
            "0" | "f" | "false" | "no" => Value::Boolean(false),
            _ => text(),
        },
        Value::Integer(_) => raw.trim().parse().map(Value::Integer).unwrap_or_else(|_| text()),
        Value::Float(_) => raw.trim().parse().map(Value::Float).unwrap_or_else(|_| text()),
        Value::Array(_) => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ),
        _ => text(),
    }
}
