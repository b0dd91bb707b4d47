//! Configuration, paths, logging and shared error types for the forms store.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    BackupSettings, Config, Secret, UploadSettings, DEFAULT_BACKUP_INTERVAL_SECS,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_BACKUPS, DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_QUERY_TIMEOUT_MS,
    LEGACY_DEFAULT_PASSPHRASE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with, parse_level, JsonlWriter, LogConfig};
pub use paths::Paths;
