//! Configuration loading from the environment and an optional file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where a raw setting value came from.
type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves named settings into typed values.
///
/// Values are looked up in the environment first (name as given, then
/// upper-cased), then in the optional file table. Unparsable values fall back
/// to the caller's default.
pub struct ConfigReader {
    env: Lookup,
    file: HashMap<String, String>,
}

impl ConfigReader {
    /// Reader backed by the process environment only.
    pub fn from_env() -> Self {
        Self {
            env: Box::new(|name| std::env::var(name).ok()),
            file: HashMap::new(),
        }
    }

    /// Reader backed by a fixed set of pairs instead of the environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            env: Box::new(move |name| values.get(name).cloned()),
            file: HashMap::new(),
        }
    }

    /// Layer a flat TOML table under the environment.
    pub fn with_file_table(mut self, content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(content)?;
        for (key, value) in table {
            let raw = match value {
                toml::Value::String(s) => s,
                toml::Value::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        toml::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            self.file.insert(key, raw);
        }
        Ok(self)
    }

    fn raw(&self, name: &str) -> Option<String> {
        (self.env)(name)
            .or_else(|| (self.env)(&name.to_uppercase()))
            .or_else(|| self.file.get(name).cloned())
    }

    pub fn string(&self, name: &str) -> String {
        self.raw(name).unwrap_or_default()
    }

    pub fn string_default(&self, name: &str, default: &str) -> String {
        match self.raw(name) {
            Some(value) if !value.is_empty() => value,
            _ => default.to_string(),
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        self.raw(name).and_then(|v| parse_bool(&v)).unwrap_or(false)
    }

    pub fn int_default<T: FromStr>(&self, name: &str, default: T) -> T {
        self.raw(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Load and validate configuration from the environment, layered over an
/// optional TOML file.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut reader = ConfigReader::from_env();
    if let Some(path) = path {
        let content = fs::read_to_string(path)?;
        reader = reader.with_file_table(&content)?;
    }

    let config = ProxyConfig::from_reader(&reader);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_parsing() {
        let reader = ConfigReader::from_pairs([
            ("a", "1"),
            ("b", "True"),
            ("c", "no"),
            ("D", "t"),
        ]);
        assert!(reader.bool("a"));
        assert!(reader.bool("b"));
        assert!(!reader.bool("c"));
        assert!(reader.bool("d"));
        assert!(!reader.bool("missing"));
    }

    #[test]
    fn test_int_default() {
        let reader = ConfigReader::from_pairs([("port", "9000"), ("bad", "x"), ("neg", "-1")]);
        assert_eq!(reader.int_default("port", 8080u16), 9000);
        assert_eq!(reader.int_default("bad", 7u16), 7);
        assert_eq!(reader.int_default("neg", 0u64), 0);
        assert_eq!(reader.int_default("neg", 5i64), -1);
    }

    #[test]
    fn test_file_table_is_overridden_by_env() {
        let reader = ConfigReader::from_pairs([("port", "9000")])
            .with_file_table(
                r#"
                port = 7000
                healthz_path = "/ping"
                upstream_addr = ["a:80", "b:80"]
                "#,
            )
            .unwrap();

        assert_eq!(reader.int_default("port", 0u16), 9000);
        assert_eq!(reader.string("healthz_path"), "/ping");
        assert_eq!(reader.string("upstream_addr"), "a:80,b:80");
    }

    #[test]
    fn test_string_default() {
        let reader = ConfigReader::from_pairs([("healthz_path", "")]);
        assert_eq!(reader.string_default("healthz_path", "/healthz"), "/healthz");
    }
}
