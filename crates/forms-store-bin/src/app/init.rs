//! Service initialization.

use crate::checkpoint_adapter::DatabaseCheckpointer;
use backup_scheduler::{BackupConfig, BackupScheduler};
use forms_config_and_utils::{Config, Paths};
use forms_crypto::{CryptoResult, FieldCipher, FileCipher};
use forms_database::{ConnectionOptions, Database, DatabaseConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use upload_validator::{FileIntegrityValidator, UploadConfig};

/// How long shutdown waits for an in-flight backup.
const BACKUP_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub(crate) fn database_config(config: &Config, paths: &Paths) -> DatabaseConfig {
    let mut connection = ConnectionOptions::new(config.database_path(paths));
    connection.cache_size_kib = config.cache_size_kib;

    let db_config = DatabaseConfig {
        connection,
        query_timeout: config.query_timeout(),
        transaction_timeout: None,
    };
    match config.transaction_timeout_ms {
        Some(ms) => db_config.with_transaction_timeout(Duration::from_millis(ms)),
        None => db_config,
    }
}

/// Backup scheduler for the configured directory. With `db`, every backup
/// checkpoints the open database first.
pub(crate) fn backup_scheduler(
    config: &Config,
    paths: &Paths,
    db: Option<&Database>,
) -> CryptoResult<BackupScheduler> {
    let cipher = FileCipher::new(config.backup_passphrase().expose())?;
    let backup_config = BackupConfig::new(config.backup_dir(paths))
        .with_max_backups(config.backup.max_backups)
        .with_interval(config.backup_interval());

    let scheduler = BackupScheduler::new(backup_config, cipher);
    Ok(match db {
        Some(db) => scheduler.with_checkpointer(Arc::new(DatabaseCheckpointer::new(db.clone()))),
        None => scheduler,
    })
}

pub(crate) fn upload_validator(config: &Config, paths: &Paths) -> FileIntegrityValidator {
    let upload_config = UploadConfig {
        upload_dir: config.upload_dir(paths),
        max_size: config.upload.max_size,
        allowed_extensions: Vec::new(),
        max_image_dimension: config.upload.max_image_dimension,
    }
    .with_allowed_extensions(config.upload.allowed_extensions.iter().cloned());
    FileIntegrityValidator::new(upload_config)
}

/// Run the service until Ctrl-C.
pub async fn run_service(config: Config, paths: Paths) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting forms store");
    paths.ensure_dirs()?;

    // Fails fast on an unusable passphrase before anything is opened.
    FieldCipher::new(config.encryption_passphrase.expose())?;

    let db = Database::open(database_config(&config, &paths))
        .await
        .map_err(|e| format!("Failed to open database: {e}"))?;
    db.run_migrations().await?;
    info!(
        path = %db.path().display(),
        query_timeout_ms = db.executor().timeout().as_millis() as u64,
        transaction_timeout_ms = db.transactions().timeout().as_millis() as u64,
        "Database ready"
    );

    let backups = Arc::new(backup_scheduler(&config, &paths, Some(&db))?);
    let auto_backup = backups.start_auto_backup(db.path());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    backups.stop_auto_backup();
    if tokio::time::timeout(BACKUP_SHUTDOWN_GRACE, auto_backup.stopped())
        .await
        .is_err()
    {
        warn!("Backup still running at shutdown");
    }

    if let Err(e) = db.checkpoint().await {
        warn!(error = %e, "Final checkpoint failed");
    }
    db.close().await?;

    info!("Forms store stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn database_config_follows_settings() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let mut config = Config {
            query_timeout_ms: 1500,
            cache_size_kib: 4096,
            ..Config::default()
        };

        let db_config = database_config(&config, &paths);
        assert_eq!(db_config.connection.path, paths.database_file());
        assert_eq!(db_config.connection.cache_size_kib, 4096);
        assert_eq!(db_config.query_timeout, Duration::from_millis(1500));
        assert_eq!(db_config.transaction_timeout, None);

        config.transaction_timeout_ms = Some(9000);
        let db_config = database_config(&config, &paths);
        assert_eq!(db_config.transaction_timeout, Some(Duration::from_millis(9000)));
    }

    #[test]
    fn upload_extensions_are_normalized() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let mut config = Config::default();
        config.upload.allowed_extensions = vec![".JPG".to_string(), ".png".to_string()];

        let validator = upload_validator(&config, &paths);
        assert_eq!(validator.config().allowed_extensions, vec![".jpg", ".png"]);
        assert_eq!(validator.config().upload_dir, paths.uploads_dir());
    }
}
