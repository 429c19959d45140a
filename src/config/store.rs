//! Layered key/value configuration store.
//!
//! Values are TOML values keyed by name. Layers are applied in order:
//! embedded defaults, an optional config file, then environment overrides.
//! Lookups honour `conf_suffix` and expand `${name}` references.

use std::path::Path;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use toml::{Table, Value};

use super::ConfigError;

const DEFAULTS: &str = include_str!("defaults.toml");

/// Prefix of environment variables that override config keys.
pub const ENV_PREFIX: &str = "SPA_RENDERER_";

/// Maximum nesting of `${name}` substitutions.
pub const GET_MAX_DEPTH: usize = 10;

const MASK: &str = "xxxxxxxxx";

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("static pattern compiles"))
}

#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: Table,
}

impl ConfigStore {
    /// Store holding only the embedded defaults.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULTS)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let values: Table =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self { values })
    }

    /// Overlays every key of a TOML file. Known keys keep their type.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let overlay = Self::from_toml_str(&raw)?;
        for (key, value) in overlay.values {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Applies `SPA_RENDERER_<KEY>` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides for every known key, looking each variable up with `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let keys: Vec<String> = self.values.keys().cloned().collect();
        for key in keys {
            let var = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
            let Some(raw) = lookup(&var) else {
                continue;
            };
            let raw = decode_data_uri(&key, &raw)?;
            let existing = &self.values[&key];
            let value = coerce(&key, existing, &raw)?;
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Parses `key=value` where value is a TOML literal, falling back to a bare string.
    pub fn set_from_assignment(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidValue {
                key: assignment.to_string(),
                message: "expected KEY=VALUE".to_string(),
            })?;
        let key = key.trim();
        let raw = raw.trim();
        let value = toml::from_str::<Table>(&format!("v = {raw}"))
            .ok()
            .and_then(|mut t| t.remove("v"))
            .unwrap_or_else(|| Value::String(raw.to_string()));
        self.set(key, value)
    }

    /// Sets a value. Changing the type of an existing key is rejected.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        if let Some(existing) = self.values.get(key) {
            if std::mem::discriminant(existing) != std::mem::discriminant(&value) {
                return Err(ConfigError::TypeMismatch {
                    key: key.to_string(),
                    expected: existing.type_str(),
                    found: value.type_str(),
                });
            }
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Value, ConfigError> {
        self.get_at_depth(key, 0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Every key with suffixes applied and references expanded.
    pub fn resolved(&self) -> Result<Table, ConfigError> {
        let suffix = self.suffix();
        let mut table = Table::new();
        for key in self.values.keys() {
            if let Some(base) = suffix
                .as_deref()
                .and_then(|s| key.strip_suffix(&format!("_{s}")))
            {
                if self.values.contains_key(base) {
                    continue;
                }
            }
            table.insert(key.clone(), self.get(key)?);
        }
        Ok(table)
    }

    /// Resolved values with secrets replaced, for display.
    pub fn masked(&self) -> Result<Table, ConfigError> {
        let mut table = self.resolved()?;
        for (key, value) in table.iter_mut() {
            if is_secret_key(key) && value.is_str() {
                *value = Value::String(MASK.to_string());
            }
        }
        Ok(table)
    }

    fn suffix(&self) -> Option<String> {
        self.values
            .get("conf_suffix")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn get_at_depth(&self, key: &str, depth: usize) -> Result<Value, ConfigError> {
        if depth == GET_MAX_DEPTH {
            return Err(ConfigError::Recursion {
                key: key.to_string(),
                limit: GET_MAX_DEPTH,
            });
        }

        let suffixed = self.suffix().map(|s| format!("{key}_{s}"));
        let value = suffixed
            .as_deref()
            .and_then(|k| self.values.get(k))
            .or_else(|| self.values.get(key))
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;

        self.substitute(value.clone(), depth)
    }

    fn substitute(&self, value: Value, depth: usize) -> Result<Value, ConfigError> {
        match value {
            Value::String(s) => {
                let pattern = reference_pattern();
                if !pattern.is_match(&s) {
                    return Ok(Value::String(s));
                }
                let mut out = String::with_capacity(s.len());
                let mut last = 0;
                for caps in pattern.captures_iter(&s) {
                    let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                        continue;
                    };
                    out.push_str(&s[last..whole.start()]);
                    match self.get_at_depth(name.as_str(), depth + 1)? {
                        Value::String(inner) => out.push_str(&inner),
                        other => out.push_str(&other.to_string()),
                    }
                    last = whole.end();
                }
                out.push_str(&s[last..]);
                Ok(Value::String(out))
            }
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.substitute(item, depth))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Table(table) => {
                let mut out = Table::new();
                for (k, v) in table {
                    out.insert(k, self.substitute(v, depth)?);
                }
                Ok(Value::Table(out))
            }
            other => Ok(other),
        }
    }
}

fn is_secret_key(key: &str) -> bool {
    key.contains("secret") || key.contains("_key") || key.contains("key_")
}

fn decode_data_uri(key: &str, raw: &str) -> Result<String, ConfigError> {
    let Some(encoded) = raw.strip_prefix("data:") else {
        return Ok(raw.to_string());
    };
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("invalid base64 payload: {e}"),
        })?;
    String::from_utf8(bytes).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("base64 payload is not UTF-8: {e}"),
    })
}

/// Converts an environment string to the type of the value it replaces.
fn coerce(key: &str, existing: &Value, raw: &str) -> Result<Value, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };
    match existing {
        Value::String(_) => Ok(Value::String(raw.to_string())),
        Value::Integer(_) => raw
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| invalid(e.to_string())),
        Value::Float(_) => raw
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| invalid(e.to_string())),
        Value::Boolean(_) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(Value::Boolean(false)),
            other => Err(invalid(format!("'{other}' is not a boolean"))),
        },
        Value::Table(_) => match serde_json::from_str::<Value>(raw) {
            Ok(table @ Value::Table(_)) => Ok(table),
            Ok(other) => Err(invalid(format!("expected a JSON object, got {}", other.type_str()))),
            Err(e) => Err(invalid(e.to_string())),
        },
        Value::Array(_) => match serde_json::from_str::<Value>(raw) {
            Ok(array @ Value::Array(_)) => Ok(array),
            _ => Ok(Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )),
        },
        Value::Datetime(_) => Err(invalid("datetime values cannot be overridden".to_string())),
    }
}
