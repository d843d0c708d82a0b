//! Raw-text extraction for every supported file type.
//!
//! Binary formats are best effort: a document with no readable text yields an
//! empty string, which the caller rejects as empty content.
use std::path::{Path, PathBuf};

use calamine::{Reader, open_workbook_auto};
use docx_rs::{DocumentChild, ParagraphChild, RunChild};
use scraper::Html;
use serde_json::{Map, Value};

use super::{FileType, IndexError};

/// Extract text on a blocking thread so parsing never stalls the runtime.
pub async fn extract_text_async(path: PathBuf, file_type: FileType) -> Result<String, IndexError> {
    tokio::task::spawn_blocking(move || extract_text(&path, file_type))
        .await
        .map_err(|e| IndexError::Extract(format!("extraction task failed: {e}")))?
}

pub fn extract_text(path: &Path, file_type: FileType) -> Result<String, IndexError> {
    match file_type {
        FileType::Text | FileType::Markdown => Ok(std::fs::read_to_string(path)?),
        FileType::Csv => extract_csv(path),
        FileType::Json => extract_json(path),
        FileType::Jsonl => extract_jsonl(path),
        FileType::Pdf => extract_pdf(path),
        FileType::Docx => extract_docx(path),
        FileType::Xlsx => extract_xlsx(path),
        FileType::Html => extract_html(path),
    }
}

fn pretty(value: &impl serde::Serialize) -> Result<String, IndexError> {
    serde_json::to_string_pretty(value).map_err(|e| IndexError::Extract(e.to_string()))
}

/// Rows become an array of header-keyed records.
fn extract_csv(path: &Path) -> Result<String, IndexError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| IndexError::Extract(format!("csv: {e}")))?;

    let headers = reader
        .headers()
        .map_err(|e| IndexError::Extract(format!("csv: {e}")))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| IndexError::Extract(format!("csv: {e}")))?;
        let record: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();
        records.push(Value::Object(record));
    }

    if records.is_empty() {
        return Ok(String::new());
    }
    pretty(&records)
}

fn extract_json(path: &Path) -> Result<String, IndexError> {
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(String::new());
    }
    let value: Value =
        serde_json::from_str(&raw).map_err(|e| IndexError::Extract(format!("json: {e}")))?;
    pretty(&value)
}

/// Each non-blank line is re-serialized on its own, separated by a blank line.
fn extract_jsonl(path: &Path) -> Result<String, IndexError> {
    let raw = std::fs::read_to_string(path)?;
    let mut blocks = Vec::new();
    for (n, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|e| IndexError::Extract(format!("jsonl line {}: {e}", n + 1)))?;
        blocks.push(pretty(&value)?);
    }
    Ok(blocks.join("\n\n"))
}

fn extract_pdf(path: &Path) -> Result<String, IndexError> {
    let doc = lopdf::Document::load(path).map_err(|e| IndexError::Extract(format!("pdf: {e}")))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();

    let mut text = String::new();
    for page in pages {
        // Pages without a text layer are skipped.
        if let Ok(page_text) = doc.extract_text(&[page]) {
            let page_text = page_text.trim();
            if !page_text.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(page_text);
            }
        }
    }
    Ok(text)
}

fn extract_docx(path: &Path) -> Result<String, IndexError> {
    let bytes = std::fs::read(path)?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| IndexError::Extract(format!("docx: {e}")))?;

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        let DocumentChild::Paragraph(paragraph) = child else {
            continue;
        };
        let mut line = String::new();
        for part in &paragraph.children {
            if let ParagraphChild::Run(run) = part {
                for run_child in &run.children {
                    if let RunChild::Text(t) = run_child {
                        line.push_str(&t.text);
                    }
                }
            }
        }
        if !line.trim().is_empty() {
            paragraphs.push(line);
        }
    }
    Ok(paragraphs.join("\n"))
}

fn extract_xlsx(path: &Path) -> Result<String, IndexError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| IndexError::Extract(format!("spreadsheet: {e}")))?;

    let mut out = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| IndexError::Extract(format!("sheet {name}: {e}")))?;

        let rows: Vec<String> = range
            .rows()
            .map(|row| {
                row.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .filter(|line| !line.trim().is_empty())
            .collect();

        if !rows.is_empty() {
            out.push(format!("# {name}\n{}", rows.join("\n")));
        }
    }
    Ok(out.join("\n\n"))
}

/// Visible text only: script, style and template contents are skipped.
fn extract_html(path: &Path) -> Result<String, IndexError> {
    let raw = std::fs::read_to_string(path)?;
    let document = Html::parse_document(&raw);

    let mut pieces = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }
    }
    Ok(pieces.join("\n"))
}
