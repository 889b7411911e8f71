//! Sync pipeline orchestration.
//!
//! Coordinates the full flow: datasource refresh → cleaned documents →
//! chunking → FTS index → optional inline embedding → storage. A sync
//! covers one named datasource or `all`, and a failing datasource never
//! stops the others. Documents whose content hash is unchanged since
//! the last sync keep their existing chunks unless `--full` is given.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::db;
use crate::embed_cmd;
use crate::models::{Chunk, SourceItem};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::traits::{DatasourceManager, DatasourceRegistry};

#[allow(clippy::too_many_arguments)]
pub async fn run_sync(
    config: &Config,
    datasource: &str,
    full: bool,
    dry_run: bool,
    since: Option<String>,
    until: Option<String>,
    limit: Option<usize>,
    progress: &dyn SyncProgressReporter,
) -> Result<()> {
    let registry = DatasourceRegistry::from_config(config)?;
    if registry.is_empty() {
        bail!("No datasources configured. Add a datasources section to the config.");
    }

    let selected: Vec<&dyn DatasourceManager> = if datasource == "all" {
        registry.managers().iter().map(|m| m.as_ref()).collect()
    } else {
        match registry.find(datasource) {
            Some(manager) => vec![manager],
            None => bail!(
                "Unknown datasource: '{}'. Configured: {}",
                datasource,
                registry.names().join(", ")
            ),
        }
    };

    // Parse date filters up front so a typo fails before any fetching
    let since_ts = match &since {
        Some(s) => Some(date_floor_ts(s)?),
        None => None,
    };
    let until_ts = match &until {
        Some(s) => Some(date_ceil_ts(s)?),
        None => None,
    };

    let pool = db::connect(config).await?;

    let mut succeeded = 0usize;
    let mut total_documents = 0u64;
    let mut total_chunks = 0u64;

    for manager in &selected {
        let name = manager.name();
        progress.report(SyncProgressEvent::Fetching {
            datasource: name.to_string(),
        });

        let mut items = match manager.full_refresh().await {
            Ok(items) => items,
            Err(e) => {
                eprintln!("Warning: datasource {} failed: {:#}", name, e);
                continue;
            }
        };

        if let Some(ts) = since_ts {
            items.retain(|item| item.updated_at.timestamp() >= ts);
        }
        if let Some(ts) = until_ts {
            items.retain(|item| item.updated_at.timestamp() <= ts);
        }
        if let Some(lim) = limit {
            items.truncate(lim);
        }

        if dry_run {
            let estimated: usize = items
                .iter()
                .map(|item| {
                    chunk_text(
                        "preview",
                        &item.body,
                        config.chunking.max_tokens,
                        config.chunking.overlap_tokens,
                    )
                    .len()
                })
                .sum();
            println!("sync {} (dry-run)", name);
            println!("  documents: {}", items.len());
            println!("  estimated chunks: {}", estimated);
            succeeded += 1;
            continue;
        }

        let total = items.len() as u64;
        let mut upserted = 0u64;
        let mut unchanged = 0u64;
        let mut chunks_written = 0u64;
        let mut embeddings_written = 0u64;
        let mut embeddings_pending = 0u64;
        let mut max_updated = 0i64;

        for (idx, item) in items.iter().enumerate() {
            let (doc_id, changed) = upsert_document(&pool, item, full).await?;

            if changed {
                let chunks = chunk_text(
                    &doc_id,
                    &item.body,
                    config.chunking.max_tokens,
                    config.chunking.overlap_tokens,
                );
                replace_chunks(&pool, &doc_id, &chunks).await?;

                let (emb_ok, emb_pending) =
                    embed_cmd::embed_chunks_inline(config, &pool, &chunks).await;
                embeddings_written += emb_ok;
                embeddings_pending += emb_pending;

                chunks_written += chunks.len() as u64;
                upserted += 1;
            } else {
                unchanged += 1;
            }

            let ts = item.updated_at.timestamp();
            if ts > max_updated {
                max_updated = ts;
            }

            progress.report(SyncProgressEvent::Ingesting {
                datasource: name.to_string(),
                n: (idx + 1) as u64,
                total,
            });
        }

        set_checkpoint(&pool, name, max_updated).await?;

        println!("sync {}", name);
        println!("  fetched: {} documents", items.len());
        println!("  upserted documents: {}", upserted);
        println!("  unchanged documents: {}", unchanged);
        println!("  chunks written: {}", chunks_written);
        if config.embedding.is_enabled() {
            println!("  embeddings written: {}", embeddings_written);
            println!("  embeddings pending: {}", embeddings_pending);
        }

        succeeded += 1;
        total_documents += items.len() as u64;
        total_chunks += chunks_written;
    }

    pool.close().await;

    if succeeded == 0 {
        bail!("all selected datasources failed");
    }

    if dry_run {
        return Ok(());
    }

    if selected.len() > 1 {
        println!(
            "sync total: {} datasources, {} documents, {} chunks",
            succeeded, total_documents, total_chunks
        );
    }
    println!("ok");

    Ok(())
}

/// Insert or update one document, returning its id and whether the
/// stored content actually changed. The dedup hash covers identity,
/// timestamp, and body, so an unchanged document costs one SELECT.
async fn upsert_document(
    pool: &SqlitePool,
    item: &SourceItem,
    force: bool,
) -> Result<(String, bool)> {
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(item.source_id.as_bytes());
    hasher.update(item.updated_at.timestamp().to_le_bytes());
    hasher.update(item.body.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    let existing: Option<(String, String)> =
        sqlx::query_as("SELECT id, dedup_hash FROM documents WHERE source = ? AND source_id = ?")
            .bind(&item.source)
            .bind(&item.source_id)
            .fetch_optional(pool)
            .await?;

    if let Some((id, old_hash)) = &existing {
        if !force && old_hash == &dedup_hash {
            return Ok((id.clone(), false));
        }
    }

    let doc_id = existing
        .map(|(id, _)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, source_url, title, author, created_at, updated_at, content_type, body, metadata_json, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            source_url = excluded.source_url,
            title = excluded.title,
            author = excluded.author,
            updated_at = excluded.updated_at,
            content_type = excluded.content_type,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&item.source)
    .bind(&item.source_id)
    .bind(&item.source_url)
    .bind(&item.title)
    .bind(&item.author)
    .bind(item.created_at.timestamp())
    .bind(item.updated_at.timestamp())
    .bind(&item.content_type)
    .bind(&item.body)
    .bind(&item.metadata_json)
    .bind(&dedup_hash)
    .execute(pool)
    .await?;

    Ok((doc_id, true))
}

/// Replace a document's chunks, FTS rows, and embeddings in one
/// transaction so searches never see a half-written document.
async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor_val: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor_val.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

fn date_floor_ts(raw: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
        .timestamp())
}

fn date_ceil_ts(raw: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
    Ok(date
        .and_hms_opt(23, 59, 59)
        .unwrap_or_default()
        .and_utc()
        .timestamp())
}
