//! Database statistics and health overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk counts,
//! embedding coverage, and per-datasource breakdowns. Used by `siphon stats`
//! to give confidence that syncs and embeddings are working as expected.

use anyhow::Result;
use sqlx::Row;
use std::collections::HashMap;

use crate::config::Config;
use crate::db;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;

    let total_fts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
        .fetch_one(&pool)
        .await?;

    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;

    let (oldest, newest): (Option<i64>, Option<i64>) =
        sqlx::query_as("SELECT MIN(updated_at), MAX(updated_at) FROM documents")
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Doc Siphon — Database Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    if config.embedding.is_enabled() {
        println!(
            "  Embedding:   {} / {}",
            config.embedding.provider,
            config.embedding.model.as_deref().unwrap_or("(no model)")
        );
    } else {
        println!("  Embedding:   disabled");
    }
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {}", total_chunks);
    if total_fts == total_chunks {
        println!("  FTS rows:    {}", total_fts);
    } else {
        println!("  FTS rows:    {} (expected {})", total_fts, total_chunks);
    }
    let coverage_pct = if total_chunks > 0 {
        (total_embedded * 100) / total_chunks
    } else {
        0
    };
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded, total_chunks, coverage_pct
    );
    if let (Some(oldest), Some(newest)) = (oldest, newest) {
        println!(
            "  Coverage:    {} to {}",
            format_date(oldest),
            format_date(newest)
        );
    }

    // Per-datasource breakdown, keyed back to checkpoint timestamps
    let source_rows = sqlx::query(
        r#"
        SELECT
            d.source,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT cv.chunk_id) AS embedded_count
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
        GROUP BY d.source
        ORDER BY d.source
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let checkpoint_rows = sqlx::query("SELECT source, updated_at FROM checkpoints")
        .fetch_all(&pool)
        .await?;
    let last_sync: HashMap<String, i64> = checkpoint_rows
        .iter()
        .map(|row| (row.get("source"), row.get("updated_at")))
        .collect();

    if !source_rows.is_empty() {
        println!();
        println!("  By datasource:");
        println!(
            "  {:<24} {:>6} {:>8} {:>10}   {}",
            "DATASOURCE", "DOCS", "CHUNKS", "EMBEDDED", "LAST SYNC"
        );
        println!("  {}", "-".repeat(76));

        for row in &source_rows {
            let source: String = row.get("source");
            let sync_display = match last_sync.get(&source) {
                Some(&ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>8} {:>10}   {}",
                source,
                row.get::<i64, _>("doc_count"),
                row.get::<i64, _>("chunk_count"),
                row.get::<i64, _>("embedded_count"),
                sync_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let (value, unit) = match delta {
        0..=59 => return "just now".to_string(),
        60..=3599 => (delta / 60, "min"),
        3600..=86399 => (delta / 3600, "hour"),
        86400..=2_591_999 => (delta / 86400, "day"),
        _ => return format_ts_iso(ts),
    };
    format!("{} {}{} ago", value, unit, if value == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}
