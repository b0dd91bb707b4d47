use forms_crypto::CryptoError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup creation failed: {0}")]
    Creation(String),

    #[error("Backup is missing or corrupted: {}", path.display())]
    Corruption { path: PathBuf },

    #[error("Backup metadata error: {0}")]
    Metadata(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BackupResult<T> = Result<T, BackupError>;
