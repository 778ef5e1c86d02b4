use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::error::CorpusError;
use crate::models::Page;

static PAGES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)\s*$").expect("valid pdfinfo regex"));

/// Page text via poppler's command line tools. Pages that come back empty
/// (scans, blank separators) are skipped but keep their numbering.
pub async fn extract_pdf_pages(pdf_path: &Path) -> Result<Vec<Page>, CorpusError> {
    if !tokio::fs::try_exists(pdf_path).await? {
        return Err(CorpusError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", pdf_path.display()),
        )));
    }

    for tool in ["pdfinfo", "pdftotext"] {
        if !has_command(tool).await {
            return Err(CorpusError::Extraction(format!(
                "`{tool}` not found on PATH; install poppler-utils to read PDFs"
            )));
        }
    }

    let page_count = get_pdf_page_count(pdf_path).await?;
    let mut pages = Vec::with_capacity(page_count as usize);

    for page in 1..=page_count {
        let output = Command::new("pdftotext")
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-layout")
            .arg("-nopgbrk")
            .arg(pdf_path)
            .arg("-")
            .output()
            .await?;

        if !output.status.success() {
            return Err(CorpusError::Extraction(format!(
                "pdftotext failed on page {page} of {}: {}",
                pdf_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        if text.trim().is_empty() {
            tracing::debug!(page, "skipping page without extractable text");
            continue;
        }

        pages.push(Page::new(page, text.trim()));
    }

    Ok(pages)
}

async fn get_pdf_page_count(pdf_path: &Path) -> Result<u32, CorpusError> {
    let output = Command::new("pdfinfo").arg(pdf_path).output().await?;

    if !output.status.success() {
        return Err(CorpusError::Extraction(format!(
            "pdfinfo could not read {}: {}",
            pdf_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        CorpusError::Extraction(format!("unable to parse page count for {}", pdf_path.display()))
    })
}

fn parse_page_count(pdfinfo_stdout: &str) -> Option<u32> {
    PAGES_RE
        .captures(pdfinfo_stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

async fn has_command(binary: &str) -> bool {
    // pdfinfo exits non-zero for -v on some poppler builds, so check PATH instead.
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}
