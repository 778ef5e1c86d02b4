pub mod pdf;

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::CorpusError;
use crate::models::Page;

const FORM_FEED: char = '\u{000C}';

/// Supplies a document's text one page at a time, in page order.
#[async_trait]
pub trait PageCorpusProvider: Send + Sync {
    async fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, CorpusError>;
}

/// Reads already-extracted page text from disk, or hands PDFs to poppler.
///
/// - `.txt`: pages separated by form feeds (what `pdftotext` writes)
/// - `.json`: an array of `{"number": .., "text": ..}`
/// - `.jsonl`: one such object per line
/// - `.pdf`: `pdfinfo` + `pdftotext`, one page at a time
#[derive(Debug, Clone, Default)]
pub struct FileCorpusProvider;

#[async_trait]
impl PageCorpusProvider for FileCorpusProvider {
    async fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, CorpusError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let pages = match extension.as_str() {
            "pdf" => pdf::extract_pdf_pages(path).await?,
            "txt" => parse_form_feed_pages(&read_utf8(path).await?),
            "json" => parse_json_pages(&read_utf8(path).await?)?,
            "jsonl" => parse_jsonl_pages(&read_utf8(path).await?)?,
            _ => {
                return Err(CorpusError::UnsupportedFormat(format!(
                    "{} (expected .pdf, .txt, .json or .jsonl)",
                    path.display()
                )))
            }
        };

        tracing::info!(path = %path.display(), pages = pages.len(), "extracted pages");
        Ok(pages)
    }
}

async fn read_utf8(path: &Path) -> Result<String, CorpusError> {
    let bytes = tokio::fs::read(path).await?;
    String::from_utf8(bytes)
        .map_err(|_| CorpusError::Extraction(format!("{} is not valid UTF-8", path.display())))
}

/// Splits on form feeds. Blank pages are skipped but still consume a number,
/// so numbering follows the physical document.
pub fn parse_form_feed_pages(text: &str) -> Vec<Page> {
    text.split(FORM_FEED)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(idx, page)| Page::new(idx as u32 + 1, page.trim()))
        .collect()
}

#[derive(Deserialize)]
struct RawPage {
    number: i64,
    text: String,
}

pub fn parse_json_pages(text: &str) -> Result<Vec<Page>, CorpusError> {
    let raw: Vec<RawPage> = serde_json::from_str(text)
        .map_err(|err| CorpusError::Extraction(format!("invalid page JSON: {err}")))?;
    validate_pages(raw)
}

pub fn parse_jsonl_pages(text: &str) -> Result<Vec<Page>, CorpusError> {
    let mut raw = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let page: RawPage = serde_json::from_str(trimmed).map_err(|err| {
            CorpusError::Extraction(format!("invalid page JSON at line {}: {err}", idx + 1))
        })?;
        raw.push(page);
    }

    validate_pages(raw)
}

fn validate_pages(raw: Vec<RawPage>) -> Result<Vec<Page>, CorpusError> {
    let mut pages: Vec<Page> = Vec::with_capacity(raw.len());

    for page in raw {
        let number = u32::try_from(page.number)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                CorpusError::Extraction(format!("page number must be positive, got {}", page.number))
            })?;

        if let Some(previous) = pages.last() {
            if number <= previous.number {
                return Err(CorpusError::Extraction(format!(
                    "page numbers must ascend: {} follows {}",
                    number, previous.number
                )));
            }
        }

        pages.push(Page::new(number, page.text));
    }

    Ok(pages)
}
