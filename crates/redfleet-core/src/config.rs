//! redfleet.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted for the vault key when none is inlined.
pub const DEFAULT_VAULT_KEY_ENV: &str = "REDFLEET_VAULT_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    pub store: Option<StoreConfig>,
    pub vault: Option<VaultConfig>,
    pub probe: Option<ProbeConfig>,
    pub watch: Option<WatchConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Base64-encoded 32-byte key. Prefer `key_env` outside development.
    pub key: Option<String>,
    pub key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub timeout: Option<String>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub filter: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("vault key not configured: set [vault].key or the {0} environment variable")]
    MissingVaultKey(String),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a redfleet.toml with every section populated.
    pub fn scaffold(store_path: &Path) -> Self {
        FleetConfig {
            store: Some(StoreConfig {
                path: Some(store_path.to_path_buf()),
            }),
            vault: Some(VaultConfig {
                key: None,
                key_env: Some(DEFAULT_VAULT_KEY_ENV.to_string()),
            }),
            probe: Some(ProbeConfig {
                timeout: Some("3s".to_string()),
                concurrency: Some(20),
            }),
            watch: Some(WatchConfig {
                interval: Some("60s".to_string()),
            }),
            log: Some(LogConfig {
                filter: Some("info,redfleet=debug".to_string()),
                format: Some(LogFormat::Text),
            }),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from("redfleet.redb"))
    }

    /// Resolve the base64 vault key: inline value first, then the environment.
    pub fn vault_key(&self) -> Result<String, ConfigError> {
        let vault = self.vault.as_ref();
        if let Some(key) = vault.and_then(|v| v.key.clone()) {
            return Ok(key);
        }
        let var = vault
            .and_then(|v| v.key_env.clone())
            .unwrap_or_else(|| DEFAULT_VAULT_KEY_ENV.to_string());
        std::env::var(&var).map_err(|_| ConfigError::MissingVaultKey(var))
    }

    pub fn probe_timeout(&self) -> Result<Duration, ConfigError> {
        match self.probe.as_ref().and_then(|p| p.timeout.as_deref()) {
            Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                field: "probe.timeout",
                value: raw.to_string(),
            }),
            None => Ok(Duration::from_secs(3)),
        }
    }

    pub fn probe_concurrency(&self) -> usize {
        self.probe
            .as_ref()
            .and_then(|p| p.concurrency)
            .filter(|c| *c > 0)
            .unwrap_or(20)
    }

    pub fn watch_interval(&self) -> Result<Duration, ConfigError> {
        match self.watch.as_ref().and_then(|w| w.interval.as_deref()) {
            Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                field: "watch.interval",
                value: raw.to_string(),
            }),
            None => Ok(Duration::from_secs(60)),
        }
    }

    pub fn log_filter(&self) -> String {
        self.log
            .as_ref()
            .and_then(|l| l.filter.clone())
            .unwrap_or_else(|| "info,redfleet=debug".to_string())
    }

    pub fn log_format(&self) -> LogFormat {
        self.log.as_ref().and_then(|l| l.format).unwrap_or_default()
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold_round_trips_through_toml() {
        let config = FleetConfig::scaffold(Path::new("/var/lib/redfleet/fleet.redb"));
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("fleet.redb"));
        assert!(toml_str.contains(DEFAULT_VAULT_KEY_ENV));

        let parsed: FleetConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.probe_concurrency(), 20);
        assert_eq!(parsed.probe_timeout().unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: FleetConfig = toml::from_str("").unwrap();
        assert_eq!(config.store_path(), PathBuf::from("redfleet.redb"));
        assert_eq!(config.probe_timeout().unwrap(), Duration::from_secs(3));
        assert_eq!(config.watch_interval().unwrap(), Duration::from_secs(60));
        assert_eq!(config.probe_concurrency(), 20);
        assert_eq!(config.log_format(), LogFormat::Text);
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[probe]
timeout = "750ms"
concurrency = 4

[log]
format = "json"
"#;
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.probe_timeout().unwrap(), Duration::from_millis(750));
        assert_eq!(config.probe_concurrency(), 4);
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn test_zero_concurrency_falls_back() {
        let toml_str = "[probe]\nconcurrency = 0\n";
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.probe_concurrency(), 20);
    }

    #[test]
    fn test_invalid_duration_is_reported() {
        let toml_str = "[watch]\ninterval = \"soon\"\n";
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.watch_interval(),
            Err(ConfigError::InvalidDuration { field: "watch.interval", .. })
        ));
    }

    #[test]
    fn test_inline_vault_key_wins() {
        let toml_str = "[vault]\nkey = \"abc\"\nkey_env = \"REDFLEET_TEST_UNSET_VAR\"\n";
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.vault_key().unwrap(), "abc");
    }

    #[test]
    fn test_missing_vault_key() {
        let toml_str = "[vault]\nkey_env = \"REDFLEET_TEST_DEFINITELY_UNSET\"\n";
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.vault_key(),
            Err(ConfigError::MissingVaultKey(var)) if var == "REDFLEET_TEST_DEFINITELY_UNSET"
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = FleetConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert!(config.store.is_none());
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("abc"), None);
    }
}
