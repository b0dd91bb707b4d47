//! Forms store service - encrypted SQLite persistence with scheduled backups.

mod app;
mod checkpoint_adapter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use forms_config_and_utils::{init_logging_with, Config, LogConfig, Paths, DEFAULT_LOG_LEVEL};

/// Forms store command-line interface.
#[derive(Parser)]
#[command(name = "forms-store")]
#[command(about = "Encrypted persistence, backups and upload checks for inspection forms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Falls back to the config file.
    #[arg(short, long, env = "FORMS_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Base directory for the database, backups, uploads and logs. Defaults to ~/.forms-store
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the store, run migrations and back up periodically until Ctrl-C
    Run,
    /// Create one backup of the database now
    Backup,
    /// List backups, newest first
    ListBackups,
    /// Check a backup against the hash in its metadata
    VerifyBackup {
        backup: PathBuf,
    },
    /// Decrypt a backup over the database (or another destination)
    RestoreBackup {
        backup: PathBuf,
        /// Destination file. Defaults to the configured database path.
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Validate an upload and move it into the upload directory
    ValidateUpload {
        file: PathBuf,
        /// Name the file was uploaded as. Defaults to the file's own name.
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };

    // Logging comes up before the config so its warnings are recorded.
    let level = match cli.log_level {
        Some(level) => level,
        None => Config::load_from_file(&paths.config_file())
            .map(|config| config.log_level)
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
    };
    init_logging_with(LogConfig {
        default_level: level,
        log_path: Some(paths.log_file()),
        ..LogConfig::default()
    })?;

    let config = Config::load(&paths)?;

    match cli.command {
        Some(Commands::Run) | None => app::run_service(config, paths).await?,
        Some(Commands::Backup) => app::backup_now(&config, &paths).await?,
        Some(Commands::ListBackups) => app::list_backups(&config, &paths).await?,
        Some(Commands::VerifyBackup { backup }) => {
            app::verify_backup(&config, &paths, &backup).await?
        }
        Some(Commands::RestoreBackup { backup, dest }) => {
            app::restore_backup(&config, &paths, &backup, dest).await?
        }
        Some(Commands::ValidateUpload { file, name }) => {
            app::validate_upload(&config, &paths, &file, name).await?
        }
    }

    Ok(())
}
