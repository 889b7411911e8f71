//! Library-level tests for the extraction pipeline.
//!
//! These prove that datasource managers built from config flow through
//! the real sync pipeline into SQLite (documents, chunks, FTS rows,
//! checkpoints), that unchanged documents short-circuit on their content
//! hash, and that the Reader/Parser traits are implementable outside the
//! crate.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use doc_siphon::config::Config;
use doc_siphon::db;
use doc_siphon::extract;
use doc_siphon::get;
use doc_siphon::ingest;
use doc_siphon::migrate;
use doc_siphon::models::SourceItem;
use doc_siphon::progress::NoProgress;
use doc_siphon::traits::{BasicManager, DatasourceManager, DatasourceRegistry, Parser, Reader};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let files_dir = tmp.path().join("files");
    fs::create_dir_all(&files_dir).unwrap();

    let value = json!({
        "db": { "path": tmp.path().join("siphon.db") },
        "chunking": { "max_tokens": 400, "overlap_tokens": 40 },
        "datasources": {
            "pdf": {
                "base_path": files_dir,
                "include_globs": ["**/*.docx"]
            }
        }
    });
    serde_json::from_value(value).unwrap()
}

/// Minimal DOCX (ZIP with word/document.xml) containing the given text.
fn write_docx(tmp: &TempDir, name: &str, text: &str) {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            text
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    fs::write(tmp.path().join("files").join(name), buf).unwrap();
}

async fn sync_pdf(cfg: &Config, full: bool) {
    ingest::run_sync(cfg, "pdf", full, false, None, None, None, &NoProgress)
        .await
        .unwrap();
}

async fn count(cfg: &Config, sql: &str) -> i64 {
    let pool = db::connect(cfg).await.unwrap();
    let n: i64 = sqlx::query_scalar(sql).fetch_one(&pool).await.unwrap();
    pool.close().await;
    n
}

async fn chunk_ids(cfg: &Config) -> Vec<String> {
    let pool = db::connect(cfg).await.unwrap();
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM chunks ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    pool.close().await;
    ids
}

// ─── Pipeline persistence ───────────────────────────────────────────

#[tokio::test]
async fn sync_writes_documents_chunks_and_fts_rows() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_docx(
        &tmp,
        "a.docx",
        "First document about ownership and borrowing in Rust.",
    );
    write_docx(
        &tmp,
        "b.docx",
        "Second document about async runtimes and executors.",
    );

    migrate::run_migrations(&cfg).await.unwrap();
    sync_pdf(&cfg, false).await;

    assert_eq!(count(&cfg, "SELECT COUNT(*) FROM documents").await, 2);

    let chunks = count(&cfg, "SELECT COUNT(*) FROM chunks").await;
    assert!(chunks >= 2, "each document should produce a chunk");

    let fts = count(&cfg, "SELECT COUNT(*) FROM chunks_fts").await;
    assert_eq!(fts, chunks, "every chunk should be indexed in FTS");

    assert_eq!(
        count(&cfg, "SELECT COUNT(*) FROM checkpoints WHERE source = 'pdf'").await,
        1
    );
}

#[tokio::test]
async fn resync_without_changes_keeps_existing_chunks() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_docx(&tmp, "a.docx", "Stable content that does not change between runs.");

    migrate::run_migrations(&cfg).await.unwrap();
    sync_pdf(&cfg, false).await;
    let before = chunk_ids(&cfg).await;
    assert!(!before.is_empty());

    sync_pdf(&cfg, false).await;
    let after = chunk_ids(&cfg).await;
    assert_eq!(
        before, after,
        "unchanged documents must not be re-chunked on resync"
    );
}

#[tokio::test]
async fn full_resync_replaces_chunks() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_docx(&tmp, "a.docx", "Content that will be force-reingested.");

    migrate::run_migrations(&cfg).await.unwrap();
    sync_pdf(&cfg, false).await;
    let before = chunk_ids(&cfg).await;

    sync_pdf(&cfg, true).await;
    let after = chunk_ids(&cfg).await;

    assert_eq!(before.len(), after.len());
    assert_ne!(before, after, "--full should rewrite chunk rows");

    // No orphans: still exactly one document
    assert_eq!(count(&cfg, "SELECT COUNT(*) FROM documents").await, 1);
    assert_eq!(
        count(&cfg, "SELECT COUNT(*) FROM chunks_fts").await,
        after.len() as i64
    );
}

#[tokio::test]
async fn sync_honors_until_and_limit_filters() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_docx(&tmp, "a.docx", "Document one.");
    write_docx(&tmp, "b.docx", "Document two.");

    migrate::run_migrations(&cfg).await.unwrap();

    // Files were just created; an until date far in the past filters them all
    ingest::run_sync(
        &cfg,
        "pdf",
        false,
        false,
        None,
        Some("1990-01-01".to_string()),
        None,
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(count(&cfg, "SELECT COUNT(*) FROM documents").await, 0);

    ingest::run_sync(&cfg, "pdf", false, false, None, None, Some(1), &NoProgress)
        .await
        .unwrap();
    assert_eq!(count(&cfg, "SELECT COUNT(*) FROM documents").await, 1);
}

// ─── Structured retrieval ───────────────────────────────────────────

#[tokio::test]
async fn get_document_returns_body_chunks_and_metadata() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_docx(
        &tmp,
        "notes.docx",
        "Meeting notes about the quarterly roadmap and hiring plan.",
    );

    migrate::run_migrations(&cfg).await.unwrap();
    sync_pdf(&cfg, false).await;

    let pool = db::connect(&cfg).await.unwrap();
    let doc_id: String =
        sqlx::query_scalar("SELECT id FROM documents WHERE source_id = 'notes.docx'")
            .fetch_one(&pool)
            .await
            .unwrap();
    pool.close().await;

    let doc = get::get_document(&cfg, &doc_id).await.unwrap();
    assert_eq!(doc.datasource, "pdf");
    assert_eq!(doc.source_id, "notes.docx");
    assert_eq!(doc.content_type, extract::MIME_DOCX);
    assert!(doc.body.contains("quarterly roadmap"));
    assert!(!doc.chunks.is_empty());
    assert_eq!(doc.metadata["datasource"], "pdf");
}

#[tokio::test]
async fn get_document_fails_for_unknown_id() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    migrate::run_migrations(&cfg).await.unwrap();

    let err = get::get_document(&cfg, "no-such-id").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

// ─── External trait implementations ─────────────────────────────────

/// A reader defined outside the crate, returning canned records.
struct MemoReader;

#[async_trait]
impl Reader for MemoReader {
    async fn read_all(&self) -> Result<Vec<Value>> {
        Ok(vec![
            json!({ "id": "m-1", "text": "Meeting notes about the hydrogen pipeline." }),
            json!({ "text": "this record has no id and is skipped" }),
            json!({ "id": "m-2", "text": "   " }),
        ])
    }
}

struct MemoParser;

impl Parser for MemoParser {
    fn parse(&self, record: &Value) -> Result<SourceItem> {
        let id = record["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("record has no id"))?;
        let now = Utc::now();
        Ok(SourceItem {
            source: "memo".to_string(),
            source_id: id.to_string(),
            source_url: None,
            title: Some(format!("Memo {}", id)),
            author: None,
            created_at: now,
            updated_at: now,
            content_type: "text/markdown".to_string(),
            body: record["text"].as_str().unwrap_or_default().to_string(),
            metadata_json: json!({ "datasource": "memo" }).to_string(),
        })
    }
}

#[tokio::test]
async fn custom_datasource_flows_through_registry() {
    let mut registry = DatasourceRegistry::new();
    registry.register(Box::new(BasicManager::new(
        "memo",
        "In-memory meeting notes",
        Box::new(MemoReader),
        Box::new(MemoParser),
    )));

    assert_eq!(registry.names(), vec!["memo"]);
    let manager = registry.find("memo").expect("registered manager");
    assert_eq!(manager.description(), "In-memory meeting notes");

    // One record parses cleanly, one is unparseable, one is blank
    let items = manager.full_refresh().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].source, "memo");
    assert_eq!(items[0].source_id, "m-1");
    assert!(items[0].body.contains("hydrogen pipeline"));
}
