use std::path::Path;

use regex::Regex;
use serde_json::json;
use tokio::process::Command;

use crate::error::{RagError, Result};
use crate::models::Document;

/// One document per page, via poppler's `pdftotext`/`pdfinfo` when installed
/// and the pure-Rust extractor otherwise.
pub async fn load_pdf(path: &Path) -> Result<Vec<Document>> {
    let source = path.display().to_string();

    if has_command("pdftotext").await {
        match extract_pages(path).await {
            Ok(pages) if !pages.is_empty() => return Ok(pages),
            Ok(_) => tracing::debug!("pdftotext produced no text for {}", source),
            Err(err) => tracing::warn!("pdftotext failed for {}: {}", source, err),
        }
    }

    let pdf_path = path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || pdf_extract::extract_text_by_pages(&pdf_path))
        .await
        .map_err(|err| RagError::ingestion(&source, format!("PDF extraction task panicked: {err}")))?
        .map_err(|err| RagError::ingestion(&source, format!("failed to extract text from PDF: {err}")))?;

    Ok(page_documents(&source, pages))
}

/// One document per non-blank page, stamped with its 0-based index.
fn page_documents(source: &str, pages: Vec<String>) -> Vec<Document> {
    let total_pages = pages.len();
    pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(page, text)| {
            let mut doc = Document::with_source(text, source);
            doc.metadata.insert("page".to_string(), json!(page));
            doc.metadata.insert("total_pages".to_string(), json!(total_pages));
            doc
        })
        .collect()
}

async fn extract_pages(path: &Path) -> Result<Vec<Document>> {
    let source = path.display().to_string();
    let page_count = get_pdf_page_count(path).await?;
    let mut documents = Vec::with_capacity(page_count);

    for page in 1..=page_count {
        let output = Command::new("pdftotext")
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-layout")
            .arg("-nopgbrk")
            .arg(path)
            .arg("-")
            .output()
            .await
            .map_err(|err| {
                RagError::ingestion(&source, format!("failed to run pdftotext for page {page}: {err}"))
            })?;

        if !output.status.success() {
            continue;
        }

        let content = String::from_utf8_lossy(&output.stdout).to_string();
        if content.trim().is_empty() {
            continue;
        }

        let mut doc = Document::with_source(content, source.clone());
        doc.metadata.insert("page".to_string(), json!(page - 1));
        doc.metadata.insert("total_pages".to_string(), json!(page_count));
        documents.push(doc);
    }

    Ok(documents)
}

async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let source = path.display().to_string();
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .map_err(|err| RagError::ingestion(&source, format!("failed to run pdfinfo: {err}")))?;

    if !output.status.success() {
        return Err(RagError::ingestion(&source, "pdfinfo exited with non-zero status"));
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| RagError::ingestion(&source, "unable to parse page count from pdfinfo"))
}

fn parse_page_count(pdfinfo: &str) -> Option<usize> {
    let regex = Regex::new(r"(?m)^Pages:\s+(\d+)\s*$").ok()?;
    regex
        .captures(pdfinfo)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
}

async fn has_command(binary: &str) -> bool {
    // pdfimages and friends exit non-zero for --version, so probe PATH instead.
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}
