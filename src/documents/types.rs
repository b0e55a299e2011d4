use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PDF_MEDIA_TYPE: &str = "application/pdf";
pub const DOCX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Document formats the extractor knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    /// Resolve a declared media type, ignoring case and any `;` parameters.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            PDF_MEDIA_TYPE => Some(Self::Pdf),
            DOCX_MEDIA_TYPE => Some(Self::Docx),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => f.write_str("PDF"),
            Self::Docx => f.write_str("DOCX"),
        }
    }
}

/// Map a file path to the media type a browser upload would declare for it.
pub fn media_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("pdf") => PDF_MEDIA_TYPE,
        Some("docx") => DOCX_MEDIA_TYPE,
        _ => FALLBACK_MEDIA_TYPE,
    }
}

/// A single upload. Only lives until its text has been extracted.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content: Vec<u8>,
    pub media_type: String,
}

impl UploadedFile {
    pub fn new(
        name: impl Into<String>,
        content: impl Into<Vec<u8>>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            media_type: media_type.into(),
        }
    }

    /// Read a file from disk, declaring its media type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, content, media_type_for_path(path)))
    }
}

/// What survives of an upload once extraction has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub name: String,
    pub media_type: String,
    pub digest: String,
    pub extracted_chars: usize,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("Error reading {kind}: {cause}")]
    ExtractionFailed { kind: DocumentKind, cause: String },
}

impl ExtractionError {
    pub(crate) fn failed(kind: DocumentKind, cause: impl fmt::Display) -> Self {
        Self::ExtractionFailed {
            kind,
            cause: cause.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccumulateError {
    #[error("No text could be extracted from the documents.")]
    EmptyContext,
    #[error("{file}: {source}")]
    Extraction {
        file: String,
        #[source]
        source: ExtractionError,
    },
}
