//! Export the indexed corpus as JSON.
//!
//! Each document is emitted as a self-contained unit with its chunks
//! nested under it, so downstream retrieval tooling can consume the
//! payload without joining on ids.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use crate::config::Config;
use crate::db;

#[derive(Serialize)]
struct ExportPayload {
    exported_at: String,
    document_count: usize,
    chunk_count: usize,
    documents: Vec<ExportDocument>,
}

#[derive(Serialize)]
struct ExportDocument {
    id: String,
    datasource: String,
    source_id: String,
    source_url: Option<String>,
    title: Option<String>,
    author: Option<String>,
    created_at: String,
    updated_at: String,
    content_type: String,
    metadata: serde_json::Value,
    body: String,
    chunks: Vec<ExportChunk>,
}

#[derive(Serialize)]
struct ExportChunk {
    id: String,
    chunk_index: i64,
    text: String,
}

/// Export every document with its chunks as one JSON payload.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;

    let chunk_rows = sqlx::query(
        "SELECT id, document_id, chunk_index, text \
         FROM chunks ORDER BY document_id, chunk_index",
    )
    .fetch_all(&pool)
    .await?;
    let chunk_count = chunk_rows.len();

    let mut chunks_by_doc: HashMap<String, Vec<ExportChunk>> = HashMap::new();
    for row in &chunk_rows {
        chunks_by_doc
            .entry(row.get("document_id"))
            .or_default()
            .push(ExportChunk {
                id: row.get("id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
            });
    }

    let doc_rows = sqlx::query(
        "SELECT id, source, source_id, source_url, title, author, created_at, updated_at, \
         content_type, body, metadata_json \
         FROM documents ORDER BY source, source_id",
    )
    .fetch_all(&pool)
    .await?;
    pool.close().await;

    let documents: Vec<ExportDocument> = doc_rows
        .iter()
        .map(|row| {
            let id: String = row.get("id");
            let raw_metadata: String = row.get("metadata_json");
            let metadata = serde_json::from_str(&raw_metadata)
                .unwrap_or_else(|_| serde_json::json!({}));
            let chunks = chunks_by_doc.remove(&id).unwrap_or_default();
            ExportDocument {
                id,
                datasource: row.get("source"),
                source_id: row.get("source_id"),
                source_url: row.get("source_url"),
                title: row.get("title"),
                author: row.get("author"),
                created_at: iso_ts(row.get("created_at")),
                updated_at: iso_ts(row.get("updated_at")),
                content_type: row.get("content_type"),
                metadata,
                body: row.get("body"),
                chunks,
            }
        })
        .collect();

    let payload = ExportPayload {
        exported_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        document_count: documents.len(),
        chunk_count,
        documents,
    };
    let json = serde_json::to_string_pretty(&payload)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} documents, {} chunks to {}",
                payload.document_count,
                payload.chunk_count,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

fn iso_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ts.to_string())
}
