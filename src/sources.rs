//! Datasource listing for the `siphon sources` command.
//!
//! Shows every configured datasource with its description, how many
//! documents it has contributed, and when it was last synced. Works
//! against a fresh or missing database by treating absent tables as
//! zero documents and no sync history.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::traits::DatasourceRegistry;

pub async fn list_sources(config: &Config) -> Result<()> {
    let registry = DatasourceRegistry::from_config(config)?;

    if registry.is_empty() {
        println!("No datasources configured.");
        println!("Add a datasources section to your config file to get started.");
        return Ok(());
    }

    // Counts and checkpoints are best-effort: before `siphon init` the
    // tables do not exist and every datasource shows 0 / never.
    let mut doc_counts: Vec<(String, i64)> = Vec::new();
    let mut checkpoints: Vec<(String, i64)> = Vec::new();

    if config.db.path.exists() {
        let pool = db::connect(config).await?;

        if let Ok(rows) =
            sqlx::query("SELECT source, COUNT(*) AS doc_count FROM documents GROUP BY source")
                .fetch_all(&pool)
                .await
        {
            for row in &rows {
                doc_counts.push((row.get("source"), row.get("doc_count")));
            }
        }

        if let Ok(rows) = sqlx::query("SELECT source, updated_at FROM checkpoints")
            .fetch_all(&pool)
            .await
        {
            for row in &rows {
                checkpoints.push((row.get("source"), row.get("updated_at")));
            }
        }

        pool.close().await;
    }

    println!(
        "{:<16} {:<48} {:>8}   {}",
        "DATASOURCE", "DESCRIPTION", "DOCS", "LAST SYNC"
    );
    println!("{}", "-".repeat(92));

    for manager in registry.managers() {
        let name = manager.name();
        let docs = doc_counts
            .iter()
            .find(|(s, _)| s == name)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        let last_sync = checkpoints
            .iter()
            .find(|(s, _)| s == name)
            .map(|(_, ts)| format_ts(*ts))
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{:<16} {:<48} {:>8}   {}",
            name,
            truncate(manager.description(), 48),
            docs,
            last_sync
        );
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
