//! Text Extraction Adapter.
//!
//! Turns a stored file into raw text plus a lightweight structural map
//! (page count, tables found). PDFs go through poppler with a Tesseract
//! fallback for scanned pages, images through Tesseract, Office formats
//! are parsed in-process (DOC needs `antiword`).

mod office;
mod pdf;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::DocumentFormat;
use crate::storage;

/// Errors that can occur during text extraction.
#[derive(Debug, Error)]
pub enum TextError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("File not readable: {0}")]
    NotFound(String),

    #[error("Corrupted file: {0}")]
    Corrupted(String),

    /// OCR or another external provider failed; worth retrying.
    #[error("Transient provider error: {0}")]
    TransientProviderError(String),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TextError {
    /// Whether the adapter call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientProviderError(_))
    }
}

/// A table found in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHint {
    /// 1-based page (or sheet) the table sits on.
    pub page: u32,
    pub rows: usize,
    pub columns: usize,
}

/// Adapter output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawText {
    pub text: String,
    pub page_count: u32,
    pub tables: Vec<TableHint>,
}

impl RawText {
    pub fn new(text: impl Into<String>, page_count: u32) -> Self {
        Self {
            text: text.into(),
            page_count,
            tables: Vec::new(),
        }
    }

    /// Number of characters after trimming surrounding whitespace.
    pub fn char_count(&self) -> usize {
        self.text.trim().chars().count()
    }

    /// Below the minimum length; downstream treats it as low-confidence input.
    pub fn is_low_content(&self, min_chars: usize) -> bool {
        self.char_count() < min_chars
    }
}

/// Produces raw text from a stored file.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, storage_ref: &str, mime_type: &str)
        -> Result<RawText, TextError>;
}

/// Text extractor backed by local files and external tools.
#[derive(Debug, Clone)]
pub struct FileTextExtractor {
    /// Tesseract language setting.
    ocr_language: String,
    /// Minimum non-whitespace characters per PDF page before OCR is tried.
    min_chars_per_page: usize,
}

impl Default for FileTextExtractor {
    fn default() -> Self {
        Self {
            ocr_language: "eng".to_string(),
            min_chars_per_page: 40,
        }
    }
}

impl FileTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set Tesseract language.
    pub fn with_language(mut self, lang: &str) -> Self {
        self.ocr_language = lang.to_string();
        self
    }

    /// Set the sparse-page threshold for the OCR fallback.
    pub fn with_min_chars_per_page(mut self, min_chars: usize) -> Self {
        self.min_chars_per_page = min_chars;
        self
    }

    fn extract_sync(&self, path: &Path, format: DocumentFormat) -> Result<RawText, TextError> {
        let format = sniff_format(path, format)?;
        debug!("Extracting {} as {}", path.display(), format.as_str());

        match format {
            DocumentFormat::Pdf => {
                pdf::extract_pdf(path, &self.ocr_language, self.min_chars_per_page)
            }
            DocumentFormat::Jpeg | DocumentFormat::Png | DocumentFormat::Tiff => {
                pdf::extract_image(path, &self.ocr_language)
            }
            DocumentFormat::Docx => office::extract_docx(&std::fs::read(path)?),
            DocumentFormat::Xlsx | DocumentFormat::Xls => {
                office::extract_spreadsheet(&std::fs::read(path)?, format)
            }
            DocumentFormat::Doc => office::extract_doc(path),
        }
    }
}

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract_text(
        &self,
        storage_ref: &str,
        mime_type: &str,
    ) -> Result<RawText, TextError> {
        let format = DocumentFormat::from_mime(mime_type)
            .ok_or_else(|| TextError::UnsupportedFormat(mime_type.to_string()))?;

        let path: PathBuf =
            storage::resolve(storage_ref).map_err(|e| TextError::NotFound(e.to_string()))?;
        if !path.is_file() {
            return Err(TextError::NotFound(path.display().to_string()));
        }

        let extractor = self.clone();
        tokio::task::spawn_blocking(move || extractor.extract_sync(&path, format))
            .await
            .map_err(|e| TextError::Internal(format!("extraction task failed: {}", e)))?
    }
}

/// Check the declared format against the file's magic bytes.
///
/// A sniffed supported format wins over the declared one. Content that is
/// recognizably something else entirely is rejected.
fn sniff_format(path: &Path, declared: DocumentFormat) -> Result<DocumentFormat, TextError> {
    let Some(kind) = infer::get_from_path(path)? else {
        return Ok(declared);
    };

    let sniffed = kind.mime_type();
    if let Some(format) = DocumentFormat::from_mime(sniffed) {
        if format != declared {
            debug!(
                "Declared {} but content looks like {}",
                declared.as_str(),
                format.as_str()
            );
        }
        return Ok(format);
    }

    // Office formats are zip/OLE containers that sniffers often report generically.
    match sniffed {
        "application/zip" | "application/x-ole-storage" | "application/x-cfb" => Ok(declared),
        other => Err(TextError::UnsupportedFormat(format!(
            "declared {} but content is {}",
            declared.as_str(),
            other
        ))),
    }
}

/// Map a finished command to stdout, or an error built by `on_failure`.
pub(crate) fn handle_cmd_output(
    result: std::io::Result<std::process::Output>,
    tool_name: &str,
    on_failure: fn(String) -> TextError,
) -> Result<String, TextError> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(on_failure(format!("{} failed: {}", tool_name, stderr.trim())))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TextError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(TextError::Io(e)),
    }
}
