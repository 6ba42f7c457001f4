//! Uploaded document model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File formats the text extraction adapter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Doc,
    Xls,
    Jpeg,
    Png,
    Tiff,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 8] = [
        Self::Pdf,
        Self::Docx,
        Self::Xlsx,
        Self::Doc,
        Self::Xls,
        Self::Jpeg,
        Self::Png,
        Self::Tiff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Doc => "doc",
            Self::Xls => "xls",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Tiff => "tiff",
        }
    }

    /// Canonical MIME type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Doc => "application/msword",
            Self::Xls => "application/vnd.ms-excel",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Tiff => "image/tiff",
        }
    }

    /// Parse either a MIME type or a short format name.
    pub fn from_mime(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        let s = s.split(';').next().unwrap_or_default().trim();
        match s {
            "pdf" | "application/pdf" => Some(Self::Pdf),
            "docx" | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "xlsx" | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(Self::Xlsx)
            }
            "doc" | "application/msword" => Some(Self::Doc),
            "xls" | "application/vnd.ms-excel" => Some(Self::Xls),
            "jpeg" | "jpg" | "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "png" | "image/png" => Some(Self::Png),
            "tiff" | "tif" | "image/tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::from_mime(ext)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::Tiff)
    }
}

/// Business category of a document; selects extra extraction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    SubsidyApplication,
    FarmRegistration,
    LandLease,
    Invoice,
    Certificate,
    #[default]
    Other,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubsidyApplication => "subsidy_application",
            Self::FarmRegistration => "farm_registration",
            Self::LandLease => "land_lease",
            Self::Invoice => "invoice",
            Self::Certificate => "certificate",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "subsidy_application" | "application" => Some(Self::SubsidyApplication),
            "farm_registration" | "registration" => Some(Self::FarmRegistration),
            "land_lease" | "lease" => Some(Self::LandLease),
            "invoice" | "receipt" => Some(Self::Invoice),
            "certificate" | "certification" => Some(Self::Certificate),
            "other" | "" => Some(Self::Other),
            _ => None,
        }
    }

    /// Lenient parse used for caller-supplied categories.
    pub fn parse_or_other(s: &str) -> Self {
        Self::from_str(s).unwrap_or_default()
    }
}

/// One uploaded file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Storage reference (`file://` URL or path) of the raw upload.
    pub storage_ref: String,
    pub file_name: String,
    pub format: DocumentFormat,
    pub category: DocumentCategory,
    /// Owning farm, if known.
    pub farm_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        id: String,
        storage_ref: String,
        file_name: String,
        format: DocumentFormat,
        category: DocumentCategory,
        farm_id: Option<String>,
    ) -> Self {
        Self {
            id,
            storage_ref,
            file_name,
            format,
            category,
            farm_id,
            created_at: Utc::now(),
        }
    }
}
