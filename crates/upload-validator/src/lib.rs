//! Upload checks for inspection photos.
//!
//! An upload is accepted when its extension is on the allow-list and its
//! size is within the limit. Accepted files are hashed (SHA-256, streamed),
//! oversized images are shrunk in place, and the file is moved to a random,
//! non-guessable name under the upload directory.

mod normalize;

use forms_crypto::digest;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub use normalize::{ImageInfo, JPEG_QUALITY};

pub const DEFAULT_MAX_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 2000;
pub const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];

#[derive(thiserror::Error, Debug)]
pub enum FileValidationError {
    #[error("unsupported file type: {extension:?}")]
    UnsupportedType { extension: String },
    #[error("file is larger than the allowed size ({size} > {max} bytes)")]
    TooLarge { size: u64, max: u64 },
    #[error("image processing failed: {0}")]
    Image(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type FileValidationResult<T> = Result<T, FileValidationError>;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub upload_dir: PathBuf,
    pub max_size: u64,
    /// Lowercase, with the leading dot.
    pub allowed_extensions: Vec<String>,
    pub max_image_dimension: u32,
}

impl UploadConfig {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_size: DEFAULT_MAX_SIZE,
            allowed_extensions: IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.into().to_ascii_lowercase())
            .collect();
        self
    }
}

/// A file received from a client, already written to a temporary path.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Name the client sent. Used only for its extension.
    pub original_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Result of a successful validation, stored alongside the photo row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedFile {
    /// SHA-256 of the file as received.
    pub hash: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
}

/// A validated upload moved to its final location.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub validation: ValidatedFile,
}

#[derive(Debug, Clone)]
pub struct FileIntegrityValidator {
    config: UploadConfig,
}

impl FileIntegrityValidator {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Check type and size, hash the contents, and shrink oversized images.
    ///
    /// The hash is taken before any resize.
    pub async fn validate_file(&self, file: &UploadedFile) -> FileValidationResult<ValidatedFile> {
        let extension = extension_of(&file.original_name);
        if !self.config.allowed_extensions.contains(&extension) {
            return Err(FileValidationError::UnsupportedType { extension });
        }
        if file.size > self.config.max_size {
            return Err(FileValidationError::TooLarge {
                size: file.size,
                max: self.config.max_size,
            });
        }

        let hash = self.calculate_hash(&file.path).await?;

        let image = if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            let path = file.path.clone();
            let max = self.config.max_image_dimension;
            let info = tokio::task::spawn_blocking(move || normalize::shrink_to_fit(&path, max))
                .await
                .map_err(|e| FileValidationError::Image(e.to_string()))??;
            if info.resized {
                info!(
                    path = %file.path.display(),
                    width = info.width,
                    height = info.height,
                    "Oversized image normalized"
                );
            }
            Some(info)
        } else {
            None
        };

        Ok(ValidatedFile {
            hash,
            size: file.size,
            extension,
            image,
        })
    }

    /// Lowercase hex SHA-256 of the file, read in chunks.
    pub async fn calculate_hash(&self, path: &Path) -> FileValidationResult<String> {
        let path = path.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || {
            digest::sha256_reader(std::fs::File::open(path)?)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        Ok(hash)
    }

    /// Random 32-hex-character name with the original extension, under
    /// `upload_dir`. Nothing from the original name but its extension
    /// survives.
    pub fn create_secure_path(&self, original_name: &str, upload_dir: &Path) -> PathBuf {
        let id = hex::encode(rand::random::<[u8; 16]>());
        upload_dir.join(format!("{id}{}", extension_of(original_name)))
    }

    /// Delete a rejected upload. A missing file is not an error.
    pub async fn cleanup_rejected(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Rejected upload removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(path = %path.display(), error = %e, "Failed to remove rejected upload"),
        }
    }

    /// Validate `file` and move it to a secure path in the upload
    /// directory. A rejected file is deleted.
    pub async fn accept(&self, file: &UploadedFile) -> FileValidationResult<StoredUpload> {
        let validation = match self.validate_file(file).await {
            Ok(validation) => validation,
            Err(e) => {
                warn!(name = %file.original_name, error = %e, "Upload rejected");
                self.cleanup_rejected(&file.path).await;
                return Err(e);
            }
        };

        tokio::fs::create_dir_all(&self.config.upload_dir).await?;
        let dest = self.create_secure_path(&file.original_name, &self.config.upload_dir);
        if tokio::fs::rename(&file.path, &dest).await.is_err() {
            // Temporary uploads may live on another filesystem.
            tokio::fs::copy(&file.path, &dest).await?;
            tokio::fs::remove_file(&file.path).await?;
        }

        info!(name = %file.original_name, path = %dest.display(), "Upload stored");
        Ok(StoredUpload {
            path: dest,
            validation,
        })
    }
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
