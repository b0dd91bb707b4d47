//! Sidecar metadata stored next to every backup artifact.

use crate::{BackupError, BackupResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Label carried by the snapshot taken before a restore overwrites a file.
pub const PRE_RESTORE_LABEL: &str = "pre_restore";

const SIDECAR_SUFFIX: &str = ".meta";
const ARTIFACT_PREFIX: &str = "backup-";
const ARTIFACT_EXTENSION: &str = "db";

/// Contents of a `.meta` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub timestamp: String,
    pub original_path: PathBuf,
    /// Lowercase hex SHA-256 of the encrypted artifact.
    pub hash: String,
    pub encrypted: bool,
    /// Artifact size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl BackupMetadata {
    /// Parse `timestamp`, accepting RFC 3339 and the sanitized form older
    /// sidecars stored (`2024-01-15T10-30-00-123Z`).
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    pub fn is_pre_restore(&self) -> bool {
        self.label.as_deref() == Some(PRE_RESTORE_LABEL)
    }

    pub(crate) async fn read(artifact: &Path) -> BackupResult<Self> {
        let path = sidecar_path(artifact);
        let raw = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&raw)
            .map_err(|e| BackupError::Metadata(format!("{}: {e}", path.display())))
    }

    pub(crate) async fn write(&self, artifact: &Path) -> BackupResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BackupError::Metadata(e.to_string()))?;
        tokio::fs::write(sidecar_path(artifact), json).await?;
        Ok(())
    }
}

/// An artifact in the catalog together with its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub metadata: BackupMetadata,
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    // Sanitized: date, 'T', then HH-MM-SS-mmmZ.
    let (date, time) = raw.split_once('T')?;
    let time = time.strip_suffix('Z')?;
    let parts: Vec<&str> = time.split('-').collect();
    let rebuilt = match parts.as_slice() {
        [h, m, s, ms] => format!("{date}T{h}:{m}:{s}.{ms}Z"),
        [h, m, s] => format!("{date}T{h}:{m}:{s}Z"),
        _ => return None,
    };
    DateTime::parse_from_rfc3339(&rebuilt)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

pub(crate) fn artifact_name(timestamp: &str, label: Option<&str>) -> String {
    let stamp = timestamp.replace([':', '.'], "-");
    match label {
        Some(label) => format!("{ARTIFACT_PREFIX}{stamp}-{label}.{ARTIFACT_EXTENSION}"),
        None => format!("{ARTIFACT_PREFIX}{stamp}.{ARTIFACT_EXTENSION}"),
    }
}

pub(crate) fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

pub(crate) fn is_artifact(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> BackupMetadata {
        BackupMetadata {
            timestamp: "2024-03-01T08:15:30.250Z".to_string(),
            original_path: PathBuf::from("/data/forms.db"),
            hash: "ab".repeat(32),
            encrypted: true,
            size: Some(4124),
            label: None,
        }
    }

    #[test]
    fn sidecar_uses_camel_case_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["originalPath"], "/data/forms.db");
        assert_eq!(json["encrypted"], true);
        assert_eq!(json["size"], 4124);
        assert!(json.get("label").is_none());
    }

    #[test]
    fn sidecar_without_size_or_label_still_reads() {
        let raw = r#"{
          "timestamp": "2024-01-15T10-30-00-123Z",
          "originalPath": "/srv/inspection/database.sqlite",
          "hash": "00",
          "encrypted": true
        }"#;
        let metadata: BackupMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(metadata.size, None);
        assert!(!metadata.is_pre_restore());
        assert_eq!(
            metadata.parsed_timestamp().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
                + chrono::Duration::milliseconds(123)
        );
    }

    #[test]
    fn rfc3339_timestamps_parse() {
        let at = sample().parsed_timestamp().unwrap();
        assert_eq!(format_timestamp(at), "2024-03-01T08:15:30.250Z");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn artifact_names() {
        let ts = "2024-03-01T08:15:30.250Z";
        assert_eq!(artifact_name(ts, None), "backup-2024-03-01T08-15-30-250Z.db");
        assert_eq!(
            artifact_name(ts, Some(PRE_RESTORE_LABEL)),
            "backup-2024-03-01T08-15-30-250Z-pre_restore.db"
        );
        assert_eq!(
            sidecar_path(Path::new("/b/backup-x.db")),
            PathBuf::from("/b/backup-x.db.meta")
        );
        assert!(is_artifact(Path::new("/b/backup-x.db")));
        assert!(!is_artifact(Path::new("/b/backup-x.db.meta")));
    }
}
