//! Layered configuration for coursehub.
//!
//! Settings resolve in order: built-in defaults, then `coursehub.toml`
//! (by default `.coursehub/coursehub.toml`, optional), then `COURSEHUB_*`
//! environment variables, then CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [database]
//! path = ".coursehub/coursehub.db"
//!
//! [logging]
//! format = "pretty"           # or "json"
//! filter = "coursehub=info,tower_http=info"
//!
//! [cache]
//! enabled = true
//! max_entries = 10000
//! ttl_secs = 3600
//!
//! [checkout]
//! webhook_secret = "whsec_..."   # required for POST /api/purchases
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = ".coursehub/coursehub.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables permissive CORS for a separately served frontend.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".coursehub/coursehub.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "coursehub=info,tower_http=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Upper bound on stored entries; the oldest entry is evicted past it.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Entries older than this are reloaded even without a revalidation.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_cache_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Payment provider callback settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutSection {
    /// Shared secret the provider sends in `x-webhook-secret`. Purchases
    /// are refused while it is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

const REDACTED: &str = "********";

/// The complete coursehub.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub checkout: CheckoutSection,
}

/// CLI flag overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse coursehub.toml")
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the full layering: file, then process environment, then CLI.
    pub fn resolve(path: &Path, cli: &CliOverrides) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// Apply `COURSEHUB_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("COURSEHUB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("COURSEHUB_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid COURSEHUB_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("COURSEHUB_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(format) = lookup("COURSEHUB_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(dev) = lookup("COURSEHUB_DEV") {
            self.server.dev_mode = matches!(dev.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(secret) = lookup("COURSEHUB_WEBHOOK_SECRET") {
            self.checkout.webhook_secret = Some(secret);
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(path) = &cli.db_path {
            self.database.path = path.clone();
        }
        if cli.dev {
            self.server.dev_mode = true;
        }
    }

    /// Serialize as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize coursehub.toml")
    }

    /// Like [`AppConfig::to_toml`], with secrets masked.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.checkout.webhook_secret.is_some() {
            shown.checkout.webhook_secret = Some(REDACTED.to_string());
        }
        shown.to_toml()
    }

    /// Validate the configuration and return any problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.server.port == 0 {
            problems.push("server.port must be between 1 and 65535".to_string());
        }
        if self.server.host.trim().is_empty() {
            problems.push("server.host must not be empty".to_string());
        }
        if self.database.path.as_os_str().is_empty() {
            problems.push("database.path must not be empty".to_string());
        }
        if self.cache.max_entries == 0 {
            problems.push("cache.max_entries must be at least 1".to_string());
        }
        if self
            .checkout
            .webhook_secret
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            problems.push("checkout.webhook_secret must not be empty when set".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.filter).is_err() {
            problems.push(format!(
                "Invalid logging.filter '{}'",
                self.logging.filter
            ));
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3141);
        assert!(!config.server.dev_mode);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.cache.enabled);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_empty() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.server.port, 3141);
    }

    #[test]
    fn test_parse_partial_sections() {
        let content = r#"
[server]
port = 8080

[logging]
format = "json"

[cache]
enabled = false
"#;
        let config = AppConfig::parse(content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_parse_rejects_unknown_log_format() {
        let content = r#"
[logging]
format = "xml"
"#;
        assert!(AppConfig::parse(content).is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::parse("[server]\nport = 8080\n").unwrap();
        config
            .apply_env(env(&[
                ("COURSEHUB_PORT", "9090"),
                ("COURSEHUB_DB_PATH", "/tmp/x.db"),
                ("COURSEHUB_DEV", "true"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert!(config.server.dev_mode);
    }

    #[test]
    fn test_env_invalid_port_is_error() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env(&[("COURSEHUB_PORT", "abc")])).is_err());
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("COURSEHUB_PORT", "9090")])).unwrap();
        config.apply_cli(&CliOverrides {
            port: Some(4000),
            ..Default::default()
        });
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("server.port"));
    }

    #[test]
    fn test_webhook_secret_from_env_and_redacted() {
        let mut config = AppConfig::default();
        assert!(config.checkout.webhook_secret.is_none());
        config
            .apply_env(env(&[("COURSEHUB_WEBHOOK_SECRET", "whsec_live")]))
            .unwrap();
        assert_eq!(config.checkout.webhook_secret.as_deref(), Some("whsec_live"));

        let shown = config.to_redacted_toml().unwrap();
        assert!(!shown.contains("whsec_live"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn test_validate_rejects_blank_secret_and_zero_cache() {
        let content = r#"
[cache]
max_entries = 0

[checkout]
webhook_secret = "  "
"#;
        let problems = AppConfig::parse(content).unwrap().validate();
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("cache.max_entries")));
        assert!(problems.iter().any(|p| p.contains("checkout.webhook_secret")));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.server.port, 3141);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coursehub.toml");
        let mut config = AppConfig::default();
        config.server.port = 5555;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.server.port, 5555);
    }
}
