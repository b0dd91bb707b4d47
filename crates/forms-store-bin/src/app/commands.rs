//! One-shot maintenance commands.

use super::init::{backup_scheduler, database_config, upload_validator};
use forms_config_and_utils::{Config, Paths};
use forms_database::Database;
use std::path::{Path, PathBuf};
use tracing::info;
use upload_validator::UploadedFile;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Back up the configured database once, checkpointing it first.
pub async fn backup_now(config: &Config, paths: &Paths) -> CommandResult {
    let db = Database::open(database_config(config, paths)).await?;
    let scheduler = backup_scheduler(config, paths, Some(&db))?;

    let result = scheduler.create_backup(db.path()).await;
    db.close().await?;

    let record = result?;
    println!("{}", record.path.display());
    Ok(())
}

pub async fn list_backups(config: &Config, paths: &Paths) -> CommandResult {
    let scheduler = backup_scheduler(config, paths, None)?;
    let records = scheduler.list_backups().await?;

    if records.is_empty() {
        println!("No backups in {}", scheduler.backup_dir().display());
        return Ok(());
    }
    for record in records {
        let size = record
            .metadata
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:>12}  {:<12}  {}",
            record.metadata.timestamp,
            size,
            record.metadata.label.as_deref().unwrap_or(""),
            record.path.display()
        );
    }
    Ok(())
}

pub async fn verify_backup(config: &Config, paths: &Paths, backup: &Path) -> CommandResult {
    let scheduler = backup_scheduler(config, paths, None)?;
    if scheduler.verify_backup(backup).await {
        println!("OK {}", backup.display());
        Ok(())
    } else {
        Err(format!("backup failed verification: {}", backup.display()).into())
    }
}

/// Restore `backup` over `dest`, or over the configured database. The
/// service must not be running against the same file.
pub async fn restore_backup(
    config: &Config,
    paths: &Paths,
    backup: &Path,
    dest: Option<PathBuf>,
) -> CommandResult {
    let dest = dest.unwrap_or_else(|| config.database_path(paths));
    let scheduler = backup_scheduler(config, paths, None)?;
    scheduler.restore_backup(backup, &dest).await?;
    println!("Restored {} to {}", backup.display(), dest.display());
    Ok(())
}

pub async fn validate_upload(
    config: &Config,
    paths: &Paths,
    file: &Path,
    name: Option<String>,
) -> CommandResult {
    let original_name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let size = tokio::fs::metadata(file).await?.len();
    let upload = UploadedFile {
        original_name,
        path: file.to_path_buf(),
        size,
    };

    let stored = upload_validator(config, paths).accept(&upload).await?;
    info!(path = %stored.path.display(), hash = %stored.validation.hash, "Upload accepted");

    let summary = serde_json::json!({
        "path": stored.path,
        "validation": stored.validation,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
