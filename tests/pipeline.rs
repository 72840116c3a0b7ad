//! End-to-end ingestion and retrieval against a real SQLite database,
//! with a deterministic local embedder standing in for the remote model.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use resource_rag::config::Config;
use resource_rag::db;
use resource_rag::embedding::EmbeddingProvider;
use resource_rag::ingest::{ingest_all, IngestOptions};
use resource_rag::migrate;
use resource_rag::search::{build_context, search};
use resource_rag::store::sqlite::SqliteStore;
use resource_rag::store::ResourceStore;

const DIMS: usize = 16;

/// Hashed bag-of-words: each lowercase word bumps one of `DIMS` buckets.
struct HashEmbedder {
    fail: AtomicBool,
}

impl HashEmbedder {
    fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let mut h: u32 = 2166136261;
        for b in word.to_lowercase().bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        v[(h as usize) % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("503 Service Unavailable");
        }
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

async fn open_store(root: &Path) -> SqliteStore {
    let pool = db::connect_path(&root.join("data/rag.sqlite")).await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn options() -> IngestOptions {
    IngestOptions::from_config(&Config::with_db_path("unused"))
}

async fn chunk_rows(store: &SqliteStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM resource_chunks")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

/// Two-page PDF with one line of text per page.
fn two_page_pdf(page_one: &str, page_two: &str) -> Vec<u8> {
    let content = |text: &str| format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", text);
    let c1 = content(page_one);
    let c2 = content(page_two);

    let objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 5 0 R /Resources << /Font << /F1 7 0 R >> >> >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 6 0 R /Resources << /Font << /F1 7 0 R >> >> >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", c1.len(), c1),
        format!("<< /Length {} >>\nstream\n{}\nendstream", c2.len(), c2),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for off in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn write_fixtures(folder: &Path) {
    std::fs::create_dir_all(folder).unwrap();
    std::fs::write(
        folder.join("faq.csv"),
        "ID,Question,Answer\n\
         1,What is the refund policy?,Refunds within 30 days\n\
         2,When do you ship?,Shipping takes three days\n",
    )
    .unwrap();
    std::fs::write(
        folder.join("manual.pdf"),
        two_page_pdf("Warranty covers parts", "Returns need a receipt"),
    )
    .unwrap();
}

#[tokio::test]
async fn ingesting_twice_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("resources");
    write_fixtures(&folder);
    let store = open_store(tmp.path()).await;
    let embedder = HashEmbedder::new();

    let first = ingest_all(&store, &embedder, &folder, &options()).await.unwrap();
    assert_eq!(first.scanned, 2);
    assert_eq!(first.ingested, 2);
    assert_eq!(first.failed, 0);
    let chunks_after_first = chunk_rows(&store).await;
    assert_eq!(chunks_after_first, first.chunks_written as i64);

    let second = ingest_all(&store, &embedder, &folder, &options()).await.unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.ingested, 0);
    assert_eq!(second.chunks_written, 0);
    assert_eq!(chunk_rows(&store).await, chunks_after_first);
    assert_eq!(store.list_resources().await.unwrap().len(), 2);
}

#[tokio::test]
async fn pdf_pages_are_extracted_in_order() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("resources");
    write_fixtures(&folder);
    let store = open_store(tmp.path()).await;

    ingest_all(&store, &HashEmbedder::new(), &folder, &options())
        .await
        .unwrap();

    let (resource, chunks) = store.get_resource("manual.pdf").await.unwrap().unwrap();
    let warranty = resource.content.find("Warranty").expect("page one text");
    let returns = resource.content.find("Returns").expect("page two text");
    assert!(warranty < returns);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].embedding.len(), DIMS);
}

#[tokio::test]
async fn malformed_csv_row_is_kept_as_raw_line() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("resources");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("broken.csv"), "ID,Question\n1\n2,Is it open?\n").unwrap();
    let store = open_store(tmp.path()).await;

    let report = ingest_all(&store, &HashEmbedder::new(), &folder, &options())
        .await
        .unwrap();
    assert_eq!(report.ingested, 1);
    assert_eq!(report.failed, 0);

    let (resource, _) = store.get_resource("broken.csv").await.unwrap().unwrap();
    assert!(resource.content.contains("Row 1: 1\n"));
    assert!(resource.content.contains("  Question: Is it open?\n"));
}

#[tokio::test]
async fn nul_characters_are_stripped() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("resources");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("nul.csv"), b"Note\nab\0cd\n").unwrap();
    let store = open_store(tmp.path()).await;

    ingest_all(&store, &HashEmbedder::new(), &folder, &options())
        .await
        .unwrap();

    let (resource, chunks) = store.get_resource("nul.csv").await.unwrap().unwrap();
    assert!(!resource.content.contains('\0'));
    assert!(resource.content.contains("Note: abcd"));
    assert!(chunks.iter().all(|c| !c.text.contains('\0')));
}

#[tokio::test]
async fn embedding_outage_leaves_nothing_behind() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("resources");
    write_fixtures(&folder);
    let store = open_store(tmp.path()).await;
    let embedder = HashEmbedder::new();

    embedder.fail.store(true, Ordering::SeqCst);
    let report = ingest_all(&store, &embedder, &folder, &options()).await.unwrap();
    assert_eq!(report.failed, 2);
    assert!(store.list_resources().await.unwrap().is_empty());
    assert_eq!(chunk_rows(&store).await, 0);

    embedder.fail.store(false, Ordering::SeqCst);
    let retry = ingest_all(&store, &embedder, &folder, &options()).await.unwrap();
    assert_eq!(retry.ingested, 2);
    assert_eq!(retry.skipped, 0);
}

#[tokio::test]
async fn search_ranks_and_filters_over_sqlite() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("resources");
    write_fixtures(&folder);
    let store = open_store(tmp.path()).await;
    let embedder = HashEmbedder::new();
    ingest_all(&store, &embedder, &folder, &options()).await.unwrap();

    let results = search(&store, &embedder, "refund policy", 5, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));

    let only_pdf = vec!["manual.pdf".to_string()];
    let filtered = search(&store, &embedder, "refund policy", 5, Some(only_pdf.as_slice()))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].resource_name, "manual.pdf");

    let context = build_context(&results);
    assert_eq!(
        context,
        format!("{}\n{}", results[0].text, results[1].text)
    );

    let unknown = vec!["missing.csv".to_string()];
    assert!(search(&store, &embedder, "refund", 5, Some(unknown.as_slice()))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn long_document_chunks_cover_the_text() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("resources");
    std::fs::create_dir_all(&folder).unwrap();

    let mut csv = String::from("ID,Body\n");
    for i in 0..400 {
        csv.push_str(&format!("{},entry {} describes the returns desk process\n", i, i));
    }
    std::fs::write(folder.join("big.csv"), &csv).unwrap();
    let store = open_store(tmp.path()).await;

    let opts = options();
    ingest_all(&store, &HashEmbedder::new(), &folder, &opts)
        .await
        .unwrap();

    let (resource, chunks) = store.get_resource("big.csv").await.unwrap().unwrap();
    assert!(chunks.len() > 2);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.chunk_index, i as i64);
    }

    let mut rebuilt: Vec<&str> = chunks[0].text.split(' ').collect();
    for c in &chunks[1..] {
        let words: Vec<&str> = c.text.split(' ').collect();
        rebuilt.extend_from_slice(&words[opts.overlap..]);
    }
    let original: Vec<&str> = resource.content.split_whitespace().collect();
    assert_eq!(rebuilt, original);
}
