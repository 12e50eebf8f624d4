//! Bridge configuration loading and validation.
//!
//! Reads `fmg-bridge.yaml` (if one can be found), resolves `${VAR}` and
//! `${VAR:-default}` references, then applies `FORTIMANAGER_*` environment
//! overrides. Everything is resolved once at startup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Config file name searched for upward from the working directory.
pub const CONFIG_FILE_NAME: &str = "fmg-bridge.yaml";

/// Env var pointing directly at a config file.
pub const CONFIG_PATH_ENV: &str = "FMG_BRIDGE_CONFIG";

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read {
        path: String,
        reason: String,
    },

    #[error("failed to parse config: {reason}")]
    Parse {
        reason: String,
    },

    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ─── Public Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Rotating file under the data directory. Stdout carries the protocol,
    /// so this is the default.
    #[default]
    File,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info,fmg_bridge=debug"`.
    pub filter: String,
    pub target: LogTarget,
    /// Log file path; `<data dir>/fmg-bridge/bridge.log` when unset.
    pub file: Option<PathBuf>,
    /// Rotated log files kept on startup.
    pub keep: usize,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            target: LogTarget::File,
            file: None,
            keep: 5,
            json: false,
        }
    }
}

/// Resolved bridge configuration.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// FortiManager host, optionally with port. Scheme and trailing `/`
    /// are stripped during validation.
    pub host: String,
    pub api_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: bool,
    pub timeout_secs: u64,
    /// Assumed session lifetime. When set, sessions are refreshed
    /// proactively once it has elapsed.
    pub session_ttl_secs: Option<u64>,
    /// Catalog file replacing the bundled one.
    pub catalog_path: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_token: None,
            username: None,
            password: None,
            verify_tls: true,
            timeout_secs: 30,
            session_ttl_secs: None,
            catalog_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("BridgeConfig")
            .field("host", &self.host)
            .field("api_token", &redact(&self.api_token))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("verify_tls", &self.verify_tls)
            .field("timeout_secs", &self.timeout_secs)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("catalog_path", &self.catalog_path)
            .field("logging", &self.logging)
            .finish()
    }
}

impl BridgeConfig {
    /// Load from the discovered config file (if any) plus the process
    /// environment, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut config = match find_config_path(&cwd) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()
    }

    /// Parse a config file. Not validated; env overrides not applied.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        let mut config: BridgeConfig = serde_yaml::from_str(&interpolated)
            .map_err(|e| ConfigError::Parse { reason: e.to_string() })?;

        config.catalog_path = config.catalog_path.map(expand_tilde_path);
        config.logging.file = config.logging.file.map(expand_tilde_path);
        Ok(config)
    }

    /// Apply `FORTIMANAGER_*` and `FMG_BRIDGE_*` overrides from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("FORTIMANAGER_HOST") {
            self.host = host;
        }
        if let Some(token) = get("FORTIMANAGER_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(user) = get("FORTIMANAGER_USERNAME") {
            self.username = Some(user);
        }
        if let Some(pass) = lookup("FORTIMANAGER_PASSWORD").filter(|v| !v.is_empty()) {
            self.password = Some(pass);
        }
        if let Some(raw) = get("FORTIMANAGER_VERIFY_SSL") {
            self.verify_tls = parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                field: "FORTIMANAGER_VERIFY_SSL",
                reason: format!("expected true/false, got '{raw}'"),
            })?;
        }
        if let Some(raw) = get("FORTIMANAGER_TIMEOUT") {
            self.timeout_secs = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "FORTIMANAGER_TIMEOUT",
                reason: format!("expected whole seconds, got '{raw}'"),
            })?;
        }
        if let Some(path) = get("FMG_BRIDGE_CATALOG") {
            self.catalog_path = Some(expand_tilde_path(PathBuf::from(path)));
        }
        if let Some(filter) = get("FMG_BRIDGE_LOG") {
            self.logging.filter = filter;
        }
        Ok(())
    }

    /// Normalize the host and check ranges.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.host = normalize_host(&self.host);
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "FortiManager host is required (set FORTIMANAGER_HOST)".into(),
            });
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConfigError::Invalid {
                field: "timeout_secs",
                reason: format!(
                    "{} is outside {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}",
                    self.timeout_secs
                ),
            });
        }
        Ok(self)
    }

    /// The JSON-RPC endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("https://{}/jsonrpc", self.host)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl_secs.map(Duration::from_secs)
    }
}

// ─── Path Discovery ──────────────────────────────────────────────────────────

/// Locate the config file: `FMG_BRIDGE_CONFIG` if set, otherwise the
/// nearest `fmg-bridge.yaml` walking upward from `start`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = expand_tilde_path(PathBuf::from(explicit));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_PATH_ENV} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn normalize_host(raw: &str) -> String {
    let host = raw.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/').to_string()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                expr.push(c);
            }
            result.push_str(&resolve_var_expr(&expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| default.to_string()),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde_path(path: PathBuf) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(config.verify_tls);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.logging.target, LogTarget::File);
        assert_eq!(config.logging.keep, 5);
    }

    #[test]
    fn test_yaml_with_interpolation() {
        std::env::set_var("__FMG_BRIDGE_TEST_HOST__", "fmg.lab.example");
        let yaml = r#"
            host: "${__FMG_BRIDGE_TEST_HOST__}"
            username: "${__FMG_BRIDGE_TEST_USER_UNSET__:-admin}"
            password: secret
            verify_tls: false
            logging:
              filter: debug
              target: stderr
        "#;
        let config = BridgeConfig::from_yaml_str(yaml).unwrap();
        std::env::remove_var("__FMG_BRIDGE_TEST_HOST__");

        assert_eq!(config.host, "fmg.lab.example");
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert!(!config.verify_tls);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.logging.target, LogTarget::Stderr);
        assert_eq!(config.logging.keep, 5);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "host: fmg.example.com\napi_token: abc\ntimeout_secs: 60\n").unwrap();

        let config = BridgeConfig::from_file(&path).unwrap().validate().unwrap();
        assert_eq!(config.endpoint(), "https://fmg.example.com/jsonrpc");
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_file_missing() {
        let err = BridgeConfig::from_file(Path::new("/nonexistent/fmg-bridge.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::from_yaml_str("host: from-file\n").unwrap();
        config
            .apply_env(env(&[
                ("FORTIMANAGER_HOST", "https://fmg.env.example/"),
                ("FORTIMANAGER_API_TOKEN", "tok"),
                ("FORTIMANAGER_VERIFY_SSL", "no"),
                ("FORTIMANAGER_TIMEOUT", "45"),
                ("FMG_BRIDGE_LOG", "fmg_bridge=trace"),
            ]))
            .unwrap();
        let config = config.validate().unwrap();

        assert_eq!(config.host, "fmg.env.example");
        assert_eq!(config.api_token.as_deref(), Some("tok"));
        assert!(!config.verify_tls);
        assert_eq!(config.timeout_secs, 45);
        assert_eq!(config.logging.filter, "fmg_bridge=trace");
    }

    #[test]
    fn test_env_blank_values_ignored() {
        let mut config = BridgeConfig::from_yaml_str("host: h\napi_token: keep\n").unwrap();
        config
            .apply_env(env(&[("FORTIMANAGER_API_TOKEN", "  ")]))
            .unwrap();
        assert_eq!(config.api_token.as_deref(), Some("keep"));
    }

    #[test]
    fn test_env_bad_values() {
        let mut config = BridgeConfig::default();
        assert!(config.apply_env(env(&[("FORTIMANAGER_VERIFY_SSL", "maybe")])).is_err());
        assert!(config.apply_env(env(&[("FORTIMANAGER_TIMEOUT", "soon")])).is_err());
    }

    #[test]
    fn test_validate() {
        let missing_host = BridgeConfig::default().validate().unwrap_err();
        assert!(matches!(missing_host, ConfigError::Invalid { field: "host", .. }));

        let config = BridgeConfig {
            host: "fmg".into(),
            timeout_secs: 301,
            ..BridgeConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid { field: "timeout_secs", .. }
        ));

        let config = BridgeConfig {
            host: "http://10.0.0.5:8443//".into(),
            timeout_secs: 1,
            ..BridgeConfig::default()
        };
        assert_eq!(config.validate().unwrap().host, "10.0.0.5:8443");
    }

    #[test]
    fn test_find_config_path_walks_upward() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(CONFIG_FILE_NAME), "host: x\n").unwrap();

        let found = find_config_path(&nested).unwrap();
        assert_eq!(found, root.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = BridgeConfig {
            host: "fmg".into(),
            api_token: Some("tok-123".into()),
            password: Some("pw-456".into()),
            ..BridgeConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("tok-123"));
        assert!(!rendered.contains("pw-456"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_expand_tilde_path() {
        let expanded = expand_tilde_path(PathBuf::from("~/catalogs/ops.json"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("catalogs/ops.json"));
    }
}
