//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line flag
//! 2. `$MAILHARVEST_CONFIG` (environment variable)
//! 3. `~/.config/mailharvest/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailharvest\config.toml` (Windows)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::stage::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub general: GeneralConfig,
    /// Mail provider access.
    pub gmail: GmailConfig,
    /// Where files and the ledger live.
    pub storage: StorageConfig,
    /// Relocation retry policy.
    pub relocate: RelocateConfig,
    /// File this configuration was read from; `None` for built-in defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Append-only operational log.
    pub log_file: PathBuf,
}

/// Mail provider access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    /// Label ids to scan (e.g. `"Label_8001345254298395342"` or `"INBOX"`).
    pub labels: Vec<String>,
    /// Mailbox owner; `"me"` is the authenticated user.
    pub user_id: String,
    /// Base URL of the REST API.
    pub api_base: String,
    /// Authorized-user token file produced by the consent flow.
    pub token_file: PathBuf,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the `<year>/<month>` tree.
    pub storage_root: PathBuf,
    /// Holding area for fetched bytes awaiting relocation.
    pub staging_root: PathBuf,
    /// SQLite ledger file.
    pub ledger_path: PathBuf,
}

/// Relocation retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocateConfig {
    /// Move attempts before giving up (at least 1).
    pub max_attempts: u32,
    /// Fixed delay between attempts, in seconds.
    pub retry_backoff_secs: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: data_dir().join("attachment_download.log"),
        }
    }
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            user_id: "me".to_string(),
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            token_file: config_dir().join("token.json"),
            request_timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = data_dir();
        Self {
            storage_root: base.join("attachments"),
            staging_root: base.join("staging"),
            ledger_path: base.join("attachments.db"),
        }
    }
}

impl Default for RelocateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_secs: 2,
        }
    }
}

impl Config {
    /// Check constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.relocate.max_attempts == 0 {
            return Err(HarvestError::Config(
                "relocate.max_attempts must be at least 1".into(),
            ));
        }
        if self.gmail.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(HarvestError::Config("gmail.labels contains an empty label".into()));
        }
        if self.storage.storage_root == self.storage.staging_root {
            return Err(HarvestError::Config(
                "storage.staging_root must differ from storage.storage_root".into(),
            ));
        }
        Ok(())
    }

    /// Like [`Config::validate`], additionally requiring at least one label.
    pub fn validate_for_run(&self) -> Result<()> {
        self.validate()?;
        if self.gmail.labels.is_empty() {
            return Err(HarvestError::Config(
                "gmail.labels is empty; list label ids with `mailharvest labels`".into(),
            ));
        }
        Ok(())
    }

    /// The retry policy used by the relocator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.relocate.max_attempts,
            backoff: Duration::from_secs(self.relocate.retry_backoff_secs),
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration.
///
/// An explicit path (flag or environment variable) must exist and parse.
/// The standard location is optional; when absent the defaults are used.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let (path, required) = match explicit {
        Some(p) => (Some(p.to_path_buf()), true),
        None => match std::env::var("MAILHARVEST_CONFIG") {
            Ok(env_path) => (Some(PathBuf::from(env_path)), true),
            Err(_) => (config_file_path(), false),
        },
    };

    let Some(path) = path else {
        return Ok(Config::default());
    };
    if !path.exists() {
        if required {
            return Err(HarvestError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| HarvestError::io(&path, e))?;
    let mut cfg = parse_config(&contents)
        .map_err(|e| HarvestError::Config(format!("{}: {e}", path.display())))?;
    cfg.source = Some(path);
    Ok(cfg)
}

/// Parse a TOML document into a [`Config`], filling omitted fields with defaults.
pub fn parse_config(contents: &str) -> std::result::Result<Config, toml::de::Error> {
    toml::from_str(contents)
}

/// Standard config file path.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mailharvest").join("config.toml"))
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailharvest")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailharvest")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "info");
        assert_eq!(cfg.gmail.user_id, "me");
        assert_eq!(cfg.relocate.max_attempts, 3);
        assert_eq!(cfg.relocate.retry_backoff_secs, 2);
        assert!(cfg.storage.ledger_path.ends_with("attachments.db"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[gmail]
labels = ["Label_8001345254298395342"]

[storage]
storage_root = "/srv/attachments"
"#;
        let cfg = parse_config(partial).expect("parse partial");
        assert_eq!(cfg.gmail.labels, vec!["Label_8001345254298395342"]);
        assert_eq!(cfg.storage.storage_root, PathBuf::from("/srv/attachments"));
        assert_eq!(cfg.gmail.user_id, "me");
        assert_eq!(cfg.relocate.max_attempts, 3);
        assert!(cfg.validate_for_run().is_ok());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let cfg = parse_config("[relocate]\nmax_attempts = 5\nretry_backoff_secs = 0\n").unwrap();
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Duration::ZERO);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.relocate.max_attempts = 0;
        assert!(matches!(cfg.validate(), Err(HarvestError::Config(_))));

        let cfg = Config::default();
        assert!(matches!(cfg.validate_for_run(), Err(HarvestError::Config(_))));

        let mut cfg = Config::default();
        cfg.storage.staging_root = cfg.storage.storage_root.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gmail]\nlabels = [\"INBOX\"]\n").unwrap();
        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.gmail.labels, vec!["INBOX"]);
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert!(Config::default().source.is_none());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[relocate]\nmax_attempts = \"three\"\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(HarvestError::Config(_))));
    }
}
