//! Backup creation, verification, restore and rotation.

use crate::auto::AutoBackupHandle;
use crate::metadata::{self, BackupMetadata, BackupRecord, PRE_RESTORE_LABEL};
use crate::{BackupError, BackupResult};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use forms_crypto::{digest, FileCipher};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_BACKUPS: usize = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Flushes pending writes of a live database before its file is copied.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn checkpoint(
        &self,
        source: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    /// Artifacts kept after each backup; older ones are deleted.
    pub max_backups: usize,
    pub interval: Duration,
}

impl BackupConfig {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            max_backups: DEFAULT_MAX_BACKUPS,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Owns the backup directory.
///
/// Backups are encrypted with a [`FileCipher`], hashed, and described by a
/// sidecar. Every successful regular backup is followed by a prune down to
/// `max_backups`; pre-restore snapshots never trigger one.
pub struct BackupScheduler {
    pub(crate) config: BackupConfig,
    cipher: FileCipher,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
    pub(crate) auto: Mutex<Option<AutoBackupHandle>>,
}

impl BackupScheduler {
    pub fn new(config: BackupConfig, cipher: FileCipher) -> Self {
        Self {
            config,
            cipher,
            checkpointer: None,
            last_timestamp: Mutex::new(None),
            auto: Mutex::new(None),
        }
    }

    /// Checkpoint the source before each copy. Without one the live file
    /// is copied as-is.
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.backup_dir
    }

    /// Encrypt `source` into a new artifact and prune old ones. A failed
    /// prune is logged and does not fail the backup.
    pub async fn create_backup(&self, source: &Path) -> BackupResult<BackupRecord> {
        self.create_labeled(source, None).await
    }

    async fn create_labeled(
        &self,
        source: &Path,
        label: Option<&str>,
    ) -> BackupResult<BackupRecord> {
        match self.write_backup(source, label).await {
            Ok(record) => {
                info!(
                    path = %record.path.display(),
                    source = %source.display(),
                    label = label.unwrap_or(""),
                    "Backup created"
                );
                if label.is_none() {
                    if let Err(e) = self.prune_backups(self.config.max_backups).await {
                        error!(error = %e, "Failed to prune old backups");
                    }
                }
                Ok(record)
            }
            Err(e) => {
                error!(source = %source.display(), error = %e, "Backup creation failed");
                Err(match e {
                    BackupError::Creation(_) => e,
                    other => BackupError::Creation(other.to_string()),
                })
            }
        }
    }

    async fn write_backup(&self, source: &Path, label: Option<&str>) -> BackupResult<BackupRecord> {
        tokio::fs::create_dir_all(&self.config.backup_dir).await?;

        if let Some(checkpointer) = &self.checkpointer {
            if let Err(e) = checkpointer.checkpoint(source).await {
                warn!(source = %source.display(), error = %e, "Checkpoint failed; copying live file");
            }
        }

        let plaintext = tokio::fs::read(source).await?;
        let cipher = self.cipher.clone();
        let (sealed, hash) = tokio::task::spawn_blocking(move || {
            let sealed = cipher.encrypt(&plaintext)?;
            let hash = digest::sha256_hex(&sealed);
            Ok::<_, BackupError>((sealed, hash))
        })
        .await
        .map_err(|e| BackupError::Creation(format!("encryption task failed: {e}")))??;

        let (timestamp, path) = self.next_artifact(label);
        tokio::fs::write(&path, &sealed).await?;

        let metadata = BackupMetadata {
            timestamp,
            original_path: source.to_path_buf(),
            hash,
            encrypted: true,
            size: Some(sealed.len() as u64),
            label: label.map(str::to_string),
        };
        if let Err(e) = metadata.write(&path).await {
            // An artifact without a sidecar can never be verified.
            remove_if_present(&path).await;
            return Err(e);
        }

        Ok(BackupRecord { path, metadata })
    }

    /// Timestamp and artifact path, strictly later than the previous one.
    fn next_artifact(&self, label: Option<&str>) -> (String, PathBuf) {
        loop {
            let at = self.next_timestamp();
            let timestamp = metadata::format_timestamp(at);
            let path = self
                .config
                .backup_dir
                .join(metadata::artifact_name(&timestamp, label));
            if !path.exists() {
                return (timestamp, path);
            }
        }
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(3);
        let mut last = self.last_timestamp.lock();
        let next = match *last {
            Some(prev) if now <= prev => prev + chrono::Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }

    /// True when the artifact's SHA-256 matches its sidecar. Any failure,
    /// including a missing sidecar, yields `false`.
    pub async fn verify_backup(&self, backup: &Path) -> bool {
        match self.check_hash(backup).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(path = %backup.display(), "Backup hash mismatch");
                false
            }
            Err(e) => {
                warn!(path = %backup.display(), error = %e, "Backup verification failed");
                false
            }
        }
    }

    async fn check_hash(&self, backup: &Path) -> BackupResult<bool> {
        let metadata = BackupMetadata::read(backup).await?;
        let path = backup.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || {
            digest::sha256_reader(std::fs::File::open(path)?)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        Ok(actual.eq_ignore_ascii_case(&metadata.hash))
    }

    /// Replace `dest` with the decrypted contents of `backup`.
    ///
    /// Fails with [`BackupError::Corruption`] before touching `dest` when
    /// verification fails. An existing `dest` is snapshotted first with the
    /// `pre_restore` label. The plaintext lands in a temporary file that is
    /// renamed over `dest`.
    pub async fn restore_backup(&self, backup: &Path, dest: &Path) -> BackupResult<()> {
        if !self.verify_backup(backup).await {
            return Err(BackupError::Corruption {
                path: backup.to_path_buf(),
            });
        }

        let sealed = tokio::fs::read(backup).await?;
        let cipher = self.cipher.clone();
        let plaintext = tokio::task::spawn_blocking(move || cipher.decrypt(&sealed))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        if tokio::fs::try_exists(dest).await? {
            let snapshot = self.create_labeled(dest, Some(PRE_RESTORE_LABEL)).await?;
            debug!(snapshot = %snapshot.path.display(), "Pre-restore snapshot taken");
        }

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "restore".to_string());
        let temp = dir.join(format!(
            ".{file_name}.restore-{}",
            hex::encode(rand::random::<[u8; 8]>())
        ));

        tokio::fs::write(&temp, &plaintext).await?;
        if let Err(e) = tokio::fs::rename(&temp, dest).await {
            remove_if_present(&temp).await;
            return Err(e.into());
        }

        for suffix in ["-wal", "-shm"] {
            let mut stale = dest.as_os_str().to_owned();
            stale.push(suffix);
            remove_if_present(Path::new(&stale)).await;
        }

        info!(backup = %backup.display(), dest = %dest.display(), "Backup restored");
        Ok(())
    }

    /// Every artifact with a readable sidecar, newest first.
    pub async fn list_backups(&self) -> BackupResult<Vec<BackupRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.config.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !metadata::is_artifact(&path) {
                continue;
            }
            match BackupMetadata::read(&path).await {
                Ok(metadata) => records.push(BackupRecord { path, metadata }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping backup with unreadable metadata");
                }
            }
        }

        records.sort_by_key(|r| Reverse((r.metadata.parsed_timestamp(), r.path.clone())));
        Ok(records)
    }

    /// Delete all but the `keep` newest regular backups and the `keep`
    /// newest pre-restore snapshots. Returns the removed artifacts; failures
    /// are logged and skipped.
    pub async fn prune_backups(&self, keep: usize) -> BackupResult<Vec<PathBuf>> {
        let records = self.list_backups().await?;
        let mut removed = Vec::new();
        let (mut regular, mut snapshots) = (0usize, 0usize);

        for record in records {
            let seen = if record.metadata.is_pre_restore() {
                &mut snapshots
            } else {
                &mut regular
            };
            *seen += 1;
            if *seen <= keep {
                continue;
            }

            if let Err(e) = tokio::fs::remove_file(&record.path).await {
                error!(path = %record.path.display(), error = %e, "Failed to remove old backup");
                continue;
            }
            let sidecar = metadata::sidecar_path(&record.path);
            if let Err(e) = tokio::fs::remove_file(&sidecar).await {
                error!(path = %sidecar.display(), error = %e, "Failed to remove backup metadata");
            }
            info!(path = %record.path.display(), "Old backup removed");
            removed.push(record.path);
        }

        Ok(removed)
    }

    pub async fn backup_metadata(&self, backup: &Path) -> BackupResult<BackupMetadata> {
        BackupMetadata::read(backup).await
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forms_crypto::DerivedKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    fn cipher() -> FileCipher {
        FileCipher::with_key(DerivedKey::from_bytes(&[3u8; 32]).unwrap())
    }

    fn setup(max_backups: usize) -> (BackupScheduler, PathBuf, TempDir) {
        let dir = tempdir().unwrap();
        let source = dir.path().join("forms.db");
        std::fs::write(&source, b"SQLite format 3\0 forms data").unwrap();
        let config = BackupConfig::new(dir.path().join("backups")).with_max_backups(max_backups);
        (BackupScheduler::new(config, cipher()), source, dir)
    }

    #[tokio::test]
    async fn backup_is_encrypted_and_described_by_sidecar() {
        let (scheduler, source, _dir) = setup(10);

        let record = scheduler.create_backup(&source).await.unwrap();

        let sealed = std::fs::read(&record.path).unwrap();
        assert_ne!(sealed, std::fs::read(&source).unwrap());
        assert_eq!(record.metadata.hash, digest::sha256_hex(&sealed));
        assert_eq!(record.metadata.size, Some(sealed.len() as u64));
        assert!(record.metadata.encrypted);

        let name = record.path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("backup-") && name.ends_with(".db"));
        assert!(!name.contains(':'));

        let raw = std::fs::read_to_string(metadata::sidecar_path(&record.path)).unwrap();
        assert!(raw.contains('\n'), "sidecar should be pretty-printed");
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["originalPath"], source.to_str().unwrap());
        assert_eq!(json["hash"], record.metadata.hash.as_str());

        assert_eq!(scheduler.backup_metadata(&record.path).await.unwrap(), record.metadata);
        assert!(scheduler.verify_backup(&record.path).await);
    }

    #[tokio::test]
    async fn rapid_backups_get_distinct_names() {
        let (scheduler, source, _dir) = setup(10);

        let mut names = Vec::new();
        for _ in 0..5 {
            names.push(scheduler.create_backup(&source).await.unwrap().path);
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[tokio::test]
    async fn rotation_keeps_newest() {
        let (scheduler, source, _dir) = setup(3);

        let mut created = Vec::new();
        for _ in 0..4 {
            created.push(scheduler.create_backup(&source).await.unwrap().path);
        }

        let listed: Vec<PathBuf> = scheduler
            .list_backups()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(listed, vec![created[3].clone(), created[2].clone(), created[1].clone()]);
        assert!(!created[0].exists());
        assert!(!metadata::sidecar_path(&created[0]).exists());
    }

    #[tokio::test]
    async fn tampered_artifact_fails_verification() {
        let (scheduler, source, _dir) = setup(10);
        let record = scheduler.create_backup(&source).await.unwrap();

        let mut sealed = std::fs::read(&record.path).unwrap();
        sealed[30] ^= 0x01;
        std::fs::write(&record.path, sealed).unwrap();

        assert!(!scheduler.verify_backup(&record.path).await);
    }

    #[tokio::test]
    async fn restore_round_trips_bytes() {
        let (scheduler, source, dir) = setup(10);
        let original = std::fs::read(&source).unwrap();
        let record = scheduler.create_backup(&source).await.unwrap();

        let dest = dir.path().join("restored").join("forms.db");
        scheduler.restore_backup(&record.path, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), original);
    }

    #[tokio::test]
    async fn corrupted_backup_is_refused_and_dest_untouched() {
        let (scheduler, source, dir) = setup(10);
        let record = scheduler.create_backup(&source).await.unwrap();

        let mut sealed = std::fs::read(&record.path).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        std::fs::write(&record.path, sealed).unwrap();

        let dest = dir.path().join("live.db");
        std::fs::write(&dest, b"current").unwrap();

        let err = scheduler.restore_backup(&record.path, &dest).await.unwrap_err();
        assert!(matches!(err, BackupError::Corruption { .. }));
        assert_eq!(std::fs::read(&dest).unwrap(), b"current");
    }

    #[tokio::test]
    async fn backup_without_sidecar_is_refused() {
        let (scheduler, source, dir) = setup(10);
        let record = scheduler.create_backup(&source).await.unwrap();
        std::fs::remove_file(metadata::sidecar_path(&record.path)).unwrap();

        let err = scheduler
            .restore_backup(&record.path, &dir.path().join("out.db"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Corruption { .. }));
        assert!(scheduler.backup_metadata(&record.path).await.is_err());
    }

    #[tokio::test]
    async fn restore_over_existing_file_takes_pre_restore_snapshot() {
        let (scheduler, source, dir) = setup(10);
        let record = scheduler.create_backup(&source).await.unwrap();

        let dest = dir.path().join("live.db");
        std::fs::write(&dest, b"newer state").unwrap();
        std::fs::write(dir.path().join("live.db-wal"), b"stale").unwrap();

        scheduler.restore_backup(&record.path, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), std::fs::read(&source).unwrap());
        assert!(!dir.path().join("live.db-wal").exists());

        let snapshots: Vec<BackupRecord> = scheduler
            .list_backups()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.metadata.is_pre_restore())
            .collect();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert!(snapshot
            .path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains(PRE_RESTORE_LABEL));
        assert_eq!(snapshot.metadata.original_path, dest);

        let undo = dir.path().join("undo.db");
        scheduler.restore_backup(&snapshot.path, &undo).await.unwrap();
        assert_eq!(std::fs::read(&undo).unwrap(), b"newer state");
    }

    #[tokio::test]
    async fn restoring_oldest_backup_keeps_it_in_the_catalog() {
        let (scheduler, source, _dir) = setup(2);
        std::fs::write(&source, b"v1").unwrap();
        let oldest = scheduler.create_backup(&source).await.unwrap();
        std::fs::write(&source, b"v2").unwrap();
        let newer = scheduler.create_backup(&source).await.unwrap();
        std::fs::write(&source, b"v3 live").unwrap();

        scheduler.restore_backup(&oldest.path, &source).await.unwrap();

        assert_eq!(std::fs::read(&source).unwrap(), b"v1");
        assert!(oldest.path.exists());
        assert!(newer.path.exists());
        assert!(scheduler.verify_backup(&oldest.path).await);

        let listed = scheduler.list_backups().await.unwrap();
        let regular = listed.iter().filter(|r| !r.metadata.is_pre_restore()).count();
        assert_eq!(regular, 2);
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test]
    async fn snapshots_do_not_displace_regular_backups() {
        let (scheduler, source, dir) = setup(2);
        let first = scheduler.create_backup(&source).await.unwrap();
        let dest = dir.path().join("live.db");
        for _ in 0..3 {
            std::fs::write(&dest, b"live").unwrap();
            scheduler.restore_backup(&first.path, &dest).await.unwrap();
        }
        let second = scheduler.create_backup(&source).await.unwrap();

        let listed = scheduler.list_backups().await.unwrap();
        let (snapshots, regular): (Vec<_>, Vec<_>) =
            listed.into_iter().partition(|r| r.metadata.is_pre_restore());
        let regular: Vec<PathBuf> = regular.into_iter().map(|r| r.path).collect();
        assert_eq!(regular, vec![second.path, first.path]);
        assert_eq!(snapshots.len(), 2);
    }

    #[tokio::test]
    async fn restore_returns_contents_from_backup_time() {
        let (scheduler, source, dir) = setup(10);
        let at_backup = digest::sha256_hex(&std::fs::read(&source).unwrap());
        let record = scheduler.create_backup(&source).await.unwrap();

        std::fs::write(&source, b"SQLite format 3\0 edited after the backup").unwrap();
        let current = digest::sha256_hex(&std::fs::read(&source).unwrap());
        assert_ne!(current, at_backup);

        let dest = dir.path().join("elsewhere").join("forms.db");
        scheduler.restore_backup(&record.path, &dest).await.unwrap();

        let restored = digest::sha256_hex(&std::fs::read(&dest).unwrap());
        assert_eq!(restored, at_backup);
        assert_ne!(restored, current);
    }

    #[tokio::test]
    async fn backup_succeeds_when_old_artifact_cannot_be_removed() {
        let (scheduler, source, _dir) = setup(1);
        let backups = scheduler.backup_dir().to_path_buf();
        std::fs::create_dir_all(&backups).unwrap();

        // A directory where an old artifact should be: remove_file fails on it.
        let stuck = backups.join("backup-2020-01-01T00-00-00-000Z.db");
        std::fs::create_dir(&stuck).unwrap();
        std::fs::write(
            metadata::sidecar_path(&stuck),
            r#"{"timestamp":"2020-01-01T00:00:00.000Z","originalPath":"/old/forms.db","hash":"00","encrypted":true}"#,
        )
        .unwrap();

        let record = scheduler.create_backup(&source).await.unwrap();

        assert!(record.path.exists());
        assert!(stuck.is_dir());
        assert!(scheduler.verify_backup(&record.path).await);
    }

    #[tokio::test]
    async fn listing_skips_unreadable_sidecars_and_missing_dir() {
        let (scheduler, source, _dir) = setup(10);
        assert!(scheduler.list_backups().await.unwrap().is_empty());

        let good = scheduler.create_backup(&source).await.unwrap();
        let bad = scheduler.create_backup(&source).await.unwrap();
        std::fs::write(metadata::sidecar_path(&bad.path), "{ not json").unwrap();
        std::fs::write(scheduler.backup_dir().join("notes.txt"), "ignored").unwrap();

        let listed = scheduler.list_backups().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, good.path);
    }

    #[tokio::test]
    async fn explicit_prune_reports_removed_artifacts() {
        let (scheduler, source, _dir) = setup(10);
        let mut created = Vec::new();
        for _ in 0..3 {
            created.push(scheduler.create_backup(&source).await.unwrap().path);
        }

        let removed = scheduler.prune_backups(1).await.unwrap();
        assert_eq!(removed, vec![created[1].clone(), created[0].clone()]);
        assert_eq!(scheduler.list_backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_source_is_a_creation_error() {
        let (scheduler, _source, dir) = setup(10);
        let err = scheduler
            .create_backup(&dir.path().join("absent.db"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Creation(_)));
    }

    struct CountingCheckpointer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Checkpointer for CountingCheckpointer {
        async fn checkpoint(
            &self,
            _source: &Path,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("database busy".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn checkpointer_runs_before_copy_and_failure_is_tolerated() {
        for fail in [false, true] {
            let (scheduler, source, _dir) = setup(10);
            let checkpointer = Arc::new(CountingCheckpointer {
                calls: AtomicUsize::new(0),
                fail,
            });
            let scheduler = scheduler.with_checkpointer(checkpointer.clone());

            let record = scheduler.create_backup(&source).await.unwrap();
            assert!(scheduler.verify_backup(&record.path).await);
            assert_eq!(checkpointer.calls.load(Ordering::SeqCst), 1);
        }
    }
}
