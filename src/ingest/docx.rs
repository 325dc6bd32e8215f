use std::fs::File;
use std::io::Read;
use std::path::Path;

use roxmltree::Document as XmlDocument;
use serde_json::json;
use zip::ZipArchive;

use crate::error::{RagError, Result};
use crate::models::Document;

/// Reads `word/document.xml` and returns one document per heading section,
/// paragraphs separated by blank lines. Blocking; call from `spawn_blocking`.
pub fn load_docx(path: &Path) -> Result<Vec<Document>> {
    let source = path.display().to_string();
    let fail = |message: String| RagError::ingestion(&source, message);

    let file = File::open(path).map_err(|err| fail(format!("failed to open DOCX: {err}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| fail(format!("DOCX is not a valid ZIP archive: {err}")))?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|err| fail(format!("DOCX missing word/document.xml: {err}")))?
        .read_to_string(&mut document_xml)
        .map_err(|err| fail(format!("failed to read word/document.xml: {err}")))?;

    sections_from_xml(&document_xml, &source).map_err(fail)
}

fn sections_from_xml(xml: &str, source: &str) -> std::result::Result<Vec<Document>, String> {
    let doc = XmlDocument::parse(xml).map_err(|err| format!("failed to parse DOCX XML: {err}"))?;

    let mut sections = Vec::new();
    let mut heading: Option<String> = None;
    let mut paragraphs: Vec<String> = Vec::new();

    for paragraph in doc
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name() == "p")
    {
        let style = paragraph
            .descendants()
            .find(|node| node.is_element() && node.tag_name().name() == "pStyle")
            .and_then(|node| {
                node.attributes()
                    .find(|attr| attr.name().ends_with("val"))
                    .map(|attr| attr.value().to_string())
            });

        let text = paragraph
            .descendants()
            .filter(|node| node.is_element() && node.tag_name().name() == "t")
            .filter_map(|node| node.text())
            .collect::<String>();

        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let is_heading = style
            .map(|style| style.to_ascii_lowercase().contains("heading"))
            .unwrap_or(false);

        if is_heading {
            push_section(&mut sections, source, heading.take(), &mut paragraphs);
            heading = Some(text.to_string());
        } else {
            paragraphs.push(text.to_string());
        }
    }
    push_section(&mut sections, source, heading, &mut paragraphs);

    Ok(sections)
}

fn push_section(
    sections: &mut Vec<Document>,
    source: &str,
    heading: Option<String>,
    paragraphs: &mut Vec<String>,
) {
    if paragraphs.is_empty() {
        return;
    }

    let mut doc = Document::with_source(paragraphs.join("\n\n"), source);
    if let Some(heading) = heading {
        doc.metadata.insert("heading".to_string(), json!(heading));
    }
    sections.push(doc);
    paragraphs.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Preface text.</w:t></w:r></w:p>
    <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Results</w:t></w:r></w:p>
    <w:p><w:r><w:t>The quarterly revenue </w:t></w:r><w:r><w:t>was $4.2 million in Q3.</w:t></w:r></w:p>
    <w:p><w:r><w:t>Costs were flat.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    #[test]
    fn sections_follow_headings() {
        let sections = sections_from_xml(BODY, "report.docx").unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].content, "Preface text.");
        assert!(sections[0].metadata.get("heading").is_none());
        assert_eq!(
            sections[1].content,
            "The quarterly revenue was $4.2 million in Q3.\n\nCosts were flat."
        );
        assert_eq!(sections[1].metadata["heading"], json!("Results"));
        assert_eq!(sections[1].metadata["source"], json!("report.docx"));
    }

    #[test]
    fn reads_zipped_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        {
            let file = File::create(&path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(BODY.as_bytes()).unwrap();
            zip.finish().unwrap();
        }

        let sections = load_docx(&path).unwrap();
        assert_eq!(sections.len(), 2);
    }

    #[test]
    fn non_zip_is_an_ingestion_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, "plain text").unwrap();
        assert!(matches!(
            load_docx(&path),
            Err(RagError::Ingestion { .. })
        ));
    }
}
