//! Configuration management for the forms store.
//!
//! Configuration is read once at process start from `<base>/config.json`
//! (defaults when the file is absent) and then overridden from the
//! environment. Secrets only ever come from the environment and are never
//! written back to disk.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default per-statement deadline.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;

/// Default number of backups kept in the catalog.
pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// Default interval between automatic backups (24 hours).
pub const DEFAULT_BACKUP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Default maximum upload size (5 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 5 * 1024 * 1024;

/// Passphrase used by earlier deployments when `ENCRYPTION_KEY` was unset.
///
/// Kept so records written under the fallback stay readable.
pub const LEGACY_DEFAULT_PASSPHRASE: &str = "your-encryption-key";

const DEFAULT_CACHE_SIZE_KIB: u32 = 2_000;
const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 2_000;

/// A secret string that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(**redacted**)")
    }
}

/// Backup scheduling and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Backup directory. Defaults to `<base>/backups`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Number of backups kept; the oldest are pruned first.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Seconds between automatic backups.
    #[serde(default = "default_backup_interval_secs")]
    pub interval_secs: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dir: None,
            max_backups: DEFAULT_MAX_BACKUPS,
            interval_secs: DEFAULT_BACKUP_INTERVAL_SECS,
        }
    }
}

/// Upload validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Upload directory. Defaults to `<base>/uploads`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_size: u64,
    /// Accepted extensions, lowercase with leading dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Images larger than this on either side are downscaled.
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            dir: None,
            max_size: DEFAULT_MAX_UPLOAD_SIZE,
            allowed_extensions: default_allowed_extensions(),
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
        }
    }
}

/// Main forms store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Database file. Defaults to `<base>/forms.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Deadline for a single query or statement, in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Deadline for a whole transaction. Twice the query deadline when unset.
    #[serde(default)]
    pub transaction_timeout_ms: Option<u64>,
    /// SQLite page cache size in KiB.
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u32,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub upload: UploadSettings,
    /// Passphrase for field encryption (env `ENCRYPTION_KEY`).
    #[serde(skip)]
    pub encryption_passphrase: Secret,
    /// Passphrase for backup files (env `BACKUP_ENCRYPTION_KEY`).
    #[serde(skip)]
    pub backup_passphrase: Option<Secret>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

fn default_cache_size_kib() -> u32 {
    DEFAULT_CACHE_SIZE_KIB
}

fn default_max_backups() -> usize {
    DEFAULT_MAX_BACKUPS
}

fn default_backup_interval_secs() -> u64 {
    DEFAULT_BACKUP_INTERVAL_SECS
}

fn default_max_upload_size() -> u64 {
    DEFAULT_MAX_UPLOAD_SIZE
}

fn default_max_image_dimension() -> u32 {
    DEFAULT_MAX_IMAGE_DIMENSION
}

fn default_allowed_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".webp"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database_path: None,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            transaction_timeout_ms: None,
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            backup: BackupSettings::default(),
            upload: UploadSettings::default(),
            encryption_passphrase: Secret::new(LEGACY_DEFAULT_PASSPHRASE),
            backup_passphrase: None,
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json`, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file. Secrets are not persisted.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).and_then(non_empty);

        if let Some(level) = lookup("FORMS_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = lookup("DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("MAX_FILE_SIZE") {
            match raw.parse::<u64>() {
                Ok(size) => self.upload.max_size = size,
                Err(_) => warn!(value = %raw, "Ignoring unparsable MAX_FILE_SIZE"),
            }
        }

        match lookup("ENCRYPTION_KEY") {
            Some(key) => self.encryption_passphrase = Secret::new(key),
            None => {
                if self.encryption_passphrase.is_empty() {
                    self.encryption_passphrase = Secret::new(LEGACY_DEFAULT_PASSPHRASE);
                }
                if self.encryption_passphrase.expose() == LEGACY_DEFAULT_PASSPHRASE {
                    warn!("ENCRYPTION_KEY is not set, using the legacy default passphrase");
                }
            }
        }
        if let Some(key) = lookup("BACKUP_ENCRYPTION_KEY") {
            self.backup_passphrase = Some(Secret::new(key));
        }
    }

    /// Reject values that would make the store unusable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.query_timeout_ms == 0 {
            return Err(CoreError::Config(
                "query_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.backup.max_backups == 0 {
            return Err(CoreError::Config(
                "backup.max_backups must be at least 1".to_string(),
            ));
        }
        if self.backup.interval_secs == 0 {
            return Err(CoreError::Config(
                "backup.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-statement deadline.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Whole-transaction deadline (2x the statement deadline by default).
    pub fn transaction_timeout(&self) -> Duration {
        match self.transaction_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.query_timeout() * 2,
        }
    }

    /// Interval between automatic backups.
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup.interval_secs)
    }

    /// Resolved database path.
    pub fn database_path(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    /// Resolved backup directory.
    pub fn backup_dir(&self, paths: &Paths) -> PathBuf {
        self.backup
            .dir
            .clone()
            .unwrap_or_else(|| paths.backups_dir())
    }

    /// Resolved upload directory.
    pub fn upload_dir(&self, paths: &Paths) -> PathBuf {
        self.upload
            .dir
            .clone()
            .unwrap_or_else(|| paths.uploads_dir())
    }

    /// Passphrase for backup files, falling back to the field passphrase.
    pub fn backup_passphrase(&self) -> &Secret {
        self.backup_passphrase
            .as_ref()
            .unwrap_or(&self.encryption_passphrase)
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.transaction_timeout(), Duration::from_secs(60));
        assert_eq!(config.backup.max_backups, 10);
        assert_eq!(config.backup_interval(), Duration::from_secs(86_400));
        assert_eq!(config.upload.max_size, 5_242_880);
        assert_eq!(config.encryption_passphrase.expose(), LEGACY_DEFAULT_PASSPHRASE);
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(
            &config_path,
            r#"{ "log_level": "debug", "query_timeout_ms": 500, "backup": { "max_backups": 3 } }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.query_timeout(), Duration::from_millis(500));
        assert_eq!(config.transaction_timeout(), Duration::from_millis(1000));
        assert_eq!(config.backup.max_backups, 3);
        assert_eq!(config.backup.interval_secs, DEFAULT_BACKUP_INTERVAL_SECS);
        assert_eq!(config.upload.allowed_extensions.len(), 4);
    }

    #[test]
    fn test_explicit_transaction_timeout_wins() {
        let config = Config {
            transaction_timeout_ms: Some(1234),
            ..Config::default()
        };
        assert_eq!(config.transaction_timeout(), Duration::from_millis(1234));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars = env(&[
            ("FORMS_LOG_LEVEL", "trace"),
            ("DB_PATH", "/data/forms.db"),
            ("MAX_FILE_SIZE", "1024"),
            ("ENCRYPTION_KEY", "field-secret"),
            ("BACKUP_ENCRYPTION_KEY", "backup-secret"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).cloned());

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.database_path, Some(PathBuf::from("/data/forms.db")));
        assert_eq!(config.upload.max_size, 1024);
        assert_eq!(config.encryption_passphrase.expose(), "field-secret");
        assert_eq!(config.backup_passphrase().expose(), "backup-secret");
    }

    #[test]
    fn test_backup_passphrase_falls_back_to_field_passphrase() {
        let vars = env(&[("ENCRYPTION_KEY", "shared")]);
        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).cloned());

        assert_eq!(config.backup_passphrase().expose(), "shared");
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        let vars = env(&[("DB_PATH", "   "), ("MAX_FILE_SIZE", "lots")]);
        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).cloned());

        assert!(config.database_path.is_none());
        assert_eq!(config.upload.max_size, DEFAULT_MAX_UPLOAD_SIZE);
    }

    #[test]
    fn test_secrets_are_not_saved_or_printed() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.encryption_passphrase = Secret::new("top-secret");
        config.save(&paths).unwrap();

        let saved = std::fs::read_to_string(paths.config_file()).unwrap();
        assert!(!saved.contains("top-secret"));
        assert!(!format!("{:?}", config).contains("top-secret"));
    }

    #[test]
    fn test_resolved_paths_use_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/srv/forms"));
        let config = Config::default();

        assert_eq!(config.database_path(&paths), PathBuf::from("/srv/forms/forms.db"));
        assert_eq!(config.backup_dir(&paths), PathBuf::from("/srv/forms/backups"));
        assert_eq!(config.upload_dir(&paths), PathBuf::from("/srv/forms/uploads"));
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let mut config = Config::default();
        config.backup.max_backups = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
