//! Checkpoint adapter for backup integration.
//!
//! Lets the backup scheduler fold the live database's WAL into the main
//! file before it copies it.

use async_trait::async_trait;
use backup_scheduler::Checkpointer;
use forms_database::Database;
use std::path::Path;
use tracing::debug;

/// Runs `PRAGMA wal_checkpoint(TRUNCATE)` through the store's executor when
/// the file being backed up is the open database.
pub struct DatabaseCheckpointer {
    db: Database,
}

impl DatabaseCheckpointer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl std::fmt::Debug for DatabaseCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCheckpointer")
            .field("path", &self.db.path())
            .finish()
    }
}

#[async_trait]
impl Checkpointer for DatabaseCheckpointer {
    async fn checkpoint(
        &self,
        source: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !same_file(source, self.db.path()) {
            debug!(source = %source.display(), "Backup source is not the open database; no checkpoint");
            return Ok(());
        }
        self.db.checkpoint().await?;
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
