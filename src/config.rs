//! Application configuration.
//!
//! Settings are layered: a JSON file first, then an env file, then the
//! process environment. Each layer only overwrites the keys it defines.
//! Env layers only touch keys that are already known, either the built-in
//! ones or settings declared by an earlier layer or by the application.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::value;

const ENDPOINT_PREFIX: &str = "applicationEndpointPrefix";
const TRACE_ERRORS: &str = "traceErrors";

/// Where [`Config::load`] reads from. Missing files are skipped.
#[derive(Clone, Debug, Default)]
pub struct ConfigSources {
    pub json_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub read_env: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    /// Path prefix stripped from endpoints before routing, for applications
    /// mounted below the site root.
    pub application_endpoint_prefix: String,
    /// Show file/line detail in error output.
    pub trace_errors: bool,
    /// Every other setting.
    pub settings: Map<String, Value>,
}

impl Config {
    pub fn load(sources: &ConfigSources) -> Result<Self> {
        let mut config = Self::default();
        config.apply_sources(sources)?;
        Ok(config)
    }

    /// Applies `sources` on top of the current values.
    pub fn apply_sources(&mut self, sources: &ConfigSources) -> Result<()> {
        if let Some(path) = &sources.json_file {
            self.apply_json_file(path)?;
        }
        if let Some(path) = &sources.env_file {
            self.apply_env_file(path)?;
        }
        if sources.read_env {
            self.apply_env_vars(std::env::vars());
        }
        Ok(())
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// Looks up a setting by name, built-in keys included.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            ENDPOINT_PREFIX => Some(Value::String(self.application_endpoint_prefix.clone())),
            TRACE_ERRORS    => Some(Value::Bool(self.trace_errors)),
            _               => self.settings.get(name).cloned(),
        }
    }

    /// Reads a JSON object file. Returns `false` when the file is absent.
    pub fn apply_json_file(&mut self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let text = std::fs::read_to_string(path)?;
        let Value::Object(map) = serde_json::from_str::<Value>(&text)? else {
            return Err(Error::internal(format!("{}: config file must hold a JSON object", path.display())));
        };
        for (key, val) in map {
            self.set(&key, val);
        }
        debug!(path = %path.display(), "loaded json config");
        Ok(true)
    }

    /// Reads a `KEY=value` env file. Keys match known settings
    /// case-insensitively. Returns `false` when the file is absent.
    pub fn apply_env_file(&mut self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        for item in dotenvy::from_path_iter(path)? {
            let (key, val) = item?;
            if let Some(known) = self.known_key(&key, true) {
                self.set(&known, Value::String(val));
            }
        }
        debug!(path = %path.display(), "loaded env file");
        Ok(true)
    }

    /// Applies environment variables whose names exactly match known keys.
    pub fn apply_env_vars<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, val) in vars {
            if let Some(known) = self.known_key(key.as_ref(), false) {
                self.set(&known, Value::String(val.into()));
            }
        }
    }

    fn known_key(&self, key: &str, ignore_case: bool) -> Option<String> {
        let matches = |candidate: &str| {
            if ignore_case { candidate.eq_ignore_ascii_case(key) } else { candidate == key }
        };
        [ENDPOINT_PREFIX, TRACE_ERRORS]
            .into_iter()
            .chain(self.settings.keys().map(String::as_str))
            .find(|candidate| matches(candidate))
            .map(str::to_owned)
    }

    fn set(&mut self, key: &str, val: Value) {
        match key {
            ENDPOINT_PREFIX => self.application_endpoint_prefix = value::to_string(&val),
            TRACE_ERRORS    => self.trace_errors = parse_flag(&val),
            _               => {
                self.settings.insert(key.to_owned(), val);
            }
        }
    }
}

/// `true`, `1`, and the strings `1/true/yes/on/y` in any case.
fn parse_flag(val: &Value) -> bool {
    match val {
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on" | "y"),
        other => value::to_bool(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.application_endpoint_prefix, "");
        assert!(!config.trace_errors);
    }

    #[test]
    fn layers_override_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("config.json");
        let env_path = dir.path().join(".env");
        fs::write(&json_path, r#"{"applicationEndpointPrefix": "/app", "traceErrors": false, "siteName": "Demo"}"#).unwrap();
        fs::write(&env_path, "TRACEERRORS=yes\nSITENAME=\"Env Demo\"\nUNRELATED=1\n").unwrap();

        let mut config = Config::load(&ConfigSources {
            json_file: Some(json_path),
            env_file: Some(env_path),
            read_env: false,
        })
        .unwrap();
        assert_eq!(config.application_endpoint_prefix, "/app");
        assert!(config.trace_errors);
        assert_eq!(config.get("siteName"), Some(json!("Env Demo")));
        assert_eq!(config.get("UNRELATED"), None);

        config.apply_env_vars([("applicationEndpointPrefix", "/v2"), ("traceerrors", "0")]);
        assert_eq!(config.application_endpoint_prefix, "/v2");
        assert!(config.trace_errors);
    }

    #[test]
    fn missing_files_are_skipped() {
        let config = Config::load(&ConfigSources {
            json_file: Some("/no/such/config.json".into()),
            env_file: Some("/no/such/.env".into()),
            read_env: false,
        })
        .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{oops").unwrap();
        assert!(Config::default().apply_json_file(&path).is_err());

        fs::write(&path, "[1, 2]").unwrap();
        assert!(Config::default().apply_json_file(&path).is_err());
    }

    #[test]
    fn flags_accept_common_spellings() {
        for on in ["1", "true", "YES", "on", "y"] {
            assert!(parse_flag(&json!(on)), "{on}");
        }
        for off in ["0", "false", "no", ""] {
            assert!(!parse_flag(&json!(off)), "{off}");
        }
        assert!(parse_flag(&json!(true)));
        assert!(parse_flag(&json!(1)));
    }
}
