//! Encrypted, hash-verified backups of the forms database.
//!
//! A backup is two files in the backup directory: the encrypted artifact
//! `backup-<timestamp>.db` and a pretty-printed JSON sidecar next to it
//! (`backup-<timestamp>.db.meta`) holding the SHA-256 of the artifact.
//! Restores verify that hash before anything is decrypted.

mod auto;
mod error;
mod metadata;
mod scheduler;

pub use auto::AutoBackupHandle;
pub use error::{BackupError, BackupResult};
pub use metadata::{BackupMetadata, BackupRecord, PRE_RESTORE_LABEL};
pub use scheduler::{BackupConfig, BackupScheduler, Checkpointer};
