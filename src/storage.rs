//! Storage reference helpers for uploaded document content.
//!
//! A storage reference is either a `file://` URL or a filesystem path
//! (`~` is expanded). Remote object-store URLs are rejected; the upload
//! gateway is expected to have materialized the file locally.

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageRefError {
    #[error("Storage reference is empty")]
    Empty,
    #[error("Unsupported storage scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid file URL: {0}")]
    InvalidFileUrl(String),
}

/// Resolve a storage reference to a local path.
pub fn resolve(storage_ref: &str) -> Result<PathBuf, StorageRefError> {
    let trimmed = storage_ref.trim();
    if trimmed.is_empty() {
        return Err(StorageRefError::Empty);
    }

    // Windows drive letters parse as a one-letter URL scheme
    if let Ok(url) = Url::parse(trimmed) {
        if url.scheme().len() > 1 {
            return match url.scheme() {
                "file" => url
                    .to_file_path()
                    .map_err(|_| StorageRefError::InvalidFileUrl(trimmed.to_string())),
                other => Err(StorageRefError::UnsupportedScheme(other.to_string())),
            };
        }
    }

    let expanded = shellexpand::tilde(trimmed);
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Build a `file://` storage reference for a local path.
pub fn file_ref(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| absolute.display().to_string())
}
