//! Document retrieval by ID.
//!
//! Fetches a full document with its metadata map and chunk rows for the
//! `siphon get` CLI command. Metadata is the flat string-to-scalar map a
//! parser attached at extraction time, so per-datasource fields (speaker,
//! space, score, path) are printed without hand-decoding JSON.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone)]
pub struct DocumentResponse {
    pub id: String,
    pub datasource: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: String, // ISO8601
    pub updated_at: String, // ISO8601
    pub content_type: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone)]
pub struct ChunkResponse {
    pub index: i64,
    pub text: String,
}

/// Load one document and its chunks as structured data.
pub async fn get_document(config: &Config, id: &str) -> Result<DocumentResponse> {
    let pool = db::connect(config).await?;

    let row = sqlx::query(
        "SELECT id, source, source_id, source_url, title, author, created_at, \
         updated_at, content_type, body, metadata_json \
         FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?;

    let Some(row) = row else {
        pool.close().await;
        bail!("document not found: {}", id);
    };

    let chunks = fetch_chunks(&pool, id).await?;
    pool.close().await;

    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_else(|_| serde_json::json!({}));

    Ok(DocumentResponse {
        id: row.get("id"),
        datasource: row.get("source"),
        source_id: row.get("source_id"),
        source_url: row.get("source_url"),
        title: row.get("title"),
        author: row.get("author"),
        created_at: format_ts_iso(row.get("created_at")),
        updated_at: format_ts_iso(row.get("updated_at")),
        content_type: row.get("content_type"),
        body: row.get("body"),
        metadata,
        chunks,
    })
}

async fn fetch_chunks(pool: &SqlitePool, document_id: &str) -> Result<Vec<ChunkResponse>> {
    let rows = sqlx::query(
        "SELECT chunk_index, text FROM chunks WHERE document_id = ? ORDER BY chunk_index",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ChunkResponse {
            index: row.get("chunk_index"),
            text: row.get("text"),
        })
        .collect())
}

/// CLI entry point. Prints the document header, metadata, body, and chunks.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let doc = match get_document(config, id).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!(
        "title:        {}",
        doc.title.as_deref().unwrap_or("(untitled)")
    );
    println!("datasource:   {}", doc.datasource);
    println!("source_id:    {}", doc.source_id);
    if let Some(ref url) = doc.source_url {
        println!("url:          {}", url);
    }
    if let Some(ref author) = doc.author {
        println!("author:       {}", author);
    }
    println!("created:      {}", doc.created_at);
    println!("updated:      {}", doc.updated_at);
    println!("content_type: {}", doc.content_type);

    if let Some(fields) = doc.metadata.as_object() {
        if !fields.is_empty() {
            println!();
            println!("--- Metadata ---");
            for (key, value) in fields {
                println!("{}: {}", key, scalar_display(value));
            }
        }
    }

    println!();
    println!("--- Body ({} chars) ---", doc.body.chars().count());
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!(
            "[chunk {}, {} chars]",
            chunk.index,
            chunk.text.chars().count()
        );
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

/// Metadata values are scalars; strings print bare, everything else as JSON.
fn scalar_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_display_prints_strings_bare() {
        assert_eq!(scalar_display(&serde_json::json!("plain")), "plain");
        assert_eq!(scalar_display(&serde_json::json!(42)), "42");
        assert_eq!(scalar_display(&serde_json::json!(true)), "true");
    }
}
