//! Embedding backfill and rebuild commands.
//!
//! `siphon embed pending` finds chunks whose embeddings are missing or
//! stale (text changed since the vector was computed) and fills them in.
//! `siphon embed rebuild` clears everything and starts over, which is
//! the path to take after switching models or dimensions. Sync uses
//! [`embed_chunks_inline`] to keep vectors current as documents land.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding;

pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set embedding.provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_chunks(&pool, &model_name, limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        pool.close().await;
        return Ok(());
    }

    let total = pending.len();
    let (embedded, failed) =
        embed_batches(&pool, provider.as_ref(), config, &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Delete all embeddings and regenerate for every chunk.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set embedding.provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;

    println!("embed rebuild: cleared existing embeddings");

    let all_chunks = find_pending_chunks(&pool, &model_name, None).await?;

    if all_chunks.is_empty() {
        println!("  no chunks to embed");
        pool.close().await;
        return Ok(());
    }

    let total = all_chunks.len();
    let (embedded, failed) =
        embed_batches(&pool, provider.as_ref(), config, &all_chunks, batch_size).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Embed pending chunks batch by batch. A failed batch is counted and
/// skipped so one bad request does not abandon the rest of the backlog.
async fn embed_batches(
    pool: &SqlitePool,
    provider: &dyn embedding::EmbeddingProvider,
    config: &Config,
    pending: &[PendingChunk],
    batch_size: usize,
) -> Result<(u64, u64)> {
    let model = provider.model_name().to_string();
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
                continue;
            }
        };

        let rows: Vec<VectorRow> = batch
            .iter()
            .zip(vectors.iter())
            .map(|(item, vec)| VectorRow {
                chunk_id: item.chunk_id.clone(),
                document_id: item.document_id.clone(),
                text_hash: item.text_hash.clone(),
                blob: embedding::vec_to_blob(vec),
            })
            .collect();

        store_vectors(pool, &model, provider.dims(), &rows).await?;
        embedded += rows.len() as u64;
    }

    Ok((embedded, failed))
}

/// Embed freshly written chunks during sync.
///
/// Sync replaces a changed document's chunk rows (and their old vectors)
/// before calling this, so every chunk here needs a vector. Failures
/// leave chunks for `embed pending` instead of aborting the sync.
pub async fn embed_chunks_inline(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[crate::models::Chunk],
) -> (u64, u64) {
    if !config.embedding.is_enabled() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Warning: could not create embedding provider: {}", e);
            return (0, chunks.len() as u64);
        }
    };

    let model = provider.model_name().to_string();
    let mut written = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors =
            match embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Warning: embedding batch failed: {}", e);
                    pending += batch.len() as u64;
                    continue;
                }
            };

        let rows: Vec<VectorRow> = batch
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vec)| VectorRow {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                text_hash: chunk.hash.clone(),
                blob: embedding::vec_to_blob(vec),
            })
            .collect();

        match store_vectors(pool, &model, provider.dims(), &rows).await {
            Ok(()) => written += rows.len() as u64,
            Err(e) => {
                eprintln!("Warning: failed to store embeddings: {}", e);
                pending += rows.len() as u64;
            }
        }
    }

    (written, pending)
}

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    text_hash: String,
}

struct VectorRow {
    chunk_id: String,
    document_id: String,
    text_hash: String,
    blob: Vec<u8>,
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(i64::MAX);

    // Chunks with no embedding for this model, or a stale one
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash AS text_hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    let results: Vec<PendingChunk> = rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            text_hash: row.get("text_hash"),
        })
        .collect();

    Ok(results)
}

/// Write one batch of vectors in a single transaction so the embeddings
/// and chunk_vectors tables never disagree about a chunk.
async fn store_vectors(
    pool: &SqlitePool,
    model: &str,
    dims: usize,
    rows: &[VectorRow],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    for row in rows {
        sqlx::query(
            "INSERT INTO embeddings (chunk_id, model, dims, created_at, hash) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(chunk_id) DO UPDATE SET \
                 model = excluded.model, \
                 dims = excluded.dims, \
                 created_at = excluded.created_at, \
                 hash = excluded.hash",
        )
        .bind(&row.chunk_id)
        .bind(model)
        .bind(dims as i64)
        .bind(now)
        .bind(&row.text_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, document_id, embedding) \
             VALUES (?, ?, ?) \
             ON CONFLICT(chunk_id) DO UPDATE SET \
                 document_id = excluded.document_id, \
                 embedding = excluded.embedding",
        )
        .bind(&row.chunk_id)
        .bind(&row.document_id)
        .bind(row.blob.as_slice())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
