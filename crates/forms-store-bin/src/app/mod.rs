//! Application wiring and lifecycle management.

mod commands;
mod init;

pub use commands::{backup_now, list_backups, restore_backup, validate_upload, verify_backup};
pub use init::run_service;
