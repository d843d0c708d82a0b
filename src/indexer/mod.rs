//! File intake: type detection, validation, text extraction and chunking.
pub mod chunker;
pub mod extract;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::IngestConfig;

/// Errors raised before a document reaches the embedding stage.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("unsupported file extension: {0:?}")]
    UnsupportedExtension(String),

    #[error("file exceeds size limit: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("no content could be extracted from {0}")]
    EmptyContent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction failed: {0}")]
    Extract(String),
}

/// Detected format of an ingested file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Text,
    Markdown,
    Csv,
    Json,
    Jsonl,
    Pdf,
    Docx,
    Xlsx,
    Html,
}

impl FileType {
    /// Map a file extension (any case, no dot) to its type.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ty = match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" => Self::Text,
            "md" | "markdown" => Self::Markdown,
            "csv" => Self::Csv,
            "json" => Self::Json,
            "jsonl" | "ndjson" => Self::Jsonl,
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "xlsx" | "xls" | "ods" => Self::Xlsx,
            "html" | "htm" => Self::Html,
            _ => return None,
        };
        Some(ty)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Html => "html",
        }
    }
}

/// Provenance attached to every chunk cut from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Path as given by the caller; used as the `source` key for removal.
    pub source: String,
    pub filename: String,
    pub file_type: FileType,
    pub file_size: u64,
}

/// Lowercase extension of `path`, or an empty string.
#[must_use]
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Check the allow-list and size limit, then describe the file.
pub fn inspect_file(path: &Path, config: &IngestConfig) -> Result<FileMetadata, IndexError> {
    let ext = extension_of(path);
    let allowed = config
        .allowed_extensions
        .iter()
        .any(|a| a.eq_ignore_ascii_case(&ext));
    let file_type = FileType::from_extension(&ext)
        .filter(|_| allowed)
        .ok_or_else(|| IndexError::UnsupportedExtension(ext.clone()))?;

    let file_size = std::fs::metadata(path)?.len();
    if file_size > config.max_file_size {
        return Err(IndexError::FileTooLarge {
            size: file_size,
            max: config.max_file_size,
        });
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(FileMetadata {
        source: path.to_string_lossy().replace('\\', "/"),
        filename,
        file_type,
        file_size,
    })
}
