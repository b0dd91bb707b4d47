//! File system paths for the forms store.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

const BASE_DIR_NAME: &str = ".forms-store";
const DATABASE_FILE_NAME: &str = "forms.db";
const LOG_FILE_NAME: &str = "forms-store.jsonl";

/// Runtime layout rooted at one base directory. Nothing is created until
/// [`Paths::ensure_dirs`] runs.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Layout under `~/.forms-store`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// `config.json`, read by [`crate::Config::load`].
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Database used when the config names none.
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join("uploads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// JSON-lines log written alongside console output.
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Create the base directory and the default logs, backups and uploads
    /// directories under it. Directories configured elsewhere are created
    /// by their owners.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        for dir in [self.logs_dir(), self.backups_dir(), self.uploads_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                CoreError::Path(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }
}
