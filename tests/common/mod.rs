#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docrag::embeddings::Embedder;
use docrag::llm::LanguageModel;
use docrag::sqlite_store::SqliteVectorStore;
use docrag::vector_store::VectorStore;
use docrag::Result;

const DIMS: usize = 64;

/// Bag-of-words embedder: lowercase alphanumeric tokens hashed into buckets.
pub struct HashingEmbedder;

fn bucket(token: &str) -> usize {
    // FNV-1a keeps buckets stable across runs.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn provider(&self) -> &str {
        "hashing"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; DIMS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[bucket(&token.to_lowercase())] += 1.0;
        }
        Ok(vector)
    }
}

/// Records every prompt and answers with a canned reply.
#[derive(Default)]
pub struct RecordingModel {
    pub calls: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), system_prompt.map(str::to_string)));
        Ok("recorded answer".to_string())
    }
}

pub async fn sqlite_store(dir: &tempfile::TempDir) -> Arc<dyn VectorStore> {
    let store = SqliteVectorStore::open(&dir.path().join("vectors.sqlite3"))
        .await
        .unwrap();
    store.set_embedding(Arc::new(HashingEmbedder));
    Arc::new(store)
}

/// Builds a minimal PDF with one Helvetica text line per page.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let font_id = 3 + 2 * pages.len();
    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect();

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        ),
    ];
    for (i, text) in pages.iter().enumerate() {
        let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {font_id} 0 R >> >> /Contents {} 0 R >>",
            4 + 2 * i
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{content}\nendstream",
            content.len()
        ));
    }
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{object}\nendobj\n", i + 1).as_bytes());
    }

    let xref_at = pdf.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        xref.push_str(&format!("{offset:010} 00000 n \n"));
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    pdf.extend_from_slice(xref.as_bytes());
    pdf
}
