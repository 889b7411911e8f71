//! Hacker News datasource.
//!
//! Pulls the current top stories from the Firebase API: one request for
//! the id list, then item fetches in small concurrent batches. Comments
//! and dead items are never yielded.
//!
//! # Configuration
//!
//! ```json
//! "datasources": {
//!   "hackernews": { "max_stories": 20, "fetch_batch_size": 5 }
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::HackerNewsConfig;
use crate::http::ApiClient;
use crate::models::SourceItem;
use crate::traits::{BasicManager, Parser, Reader};

pub fn manager(config: &HackerNewsConfig) -> Result<BasicManager> {
    let client = ApiClient::new(&config.base_url)?;
    Ok(BasicManager::new(
        "hackernews",
        "Top stories from Hacker News",
        Box::new(HackerNewsReader {
            client: Arc::new(client),
            config: config.clone(),
        }),
        Box::new(HackerNewsParser),
    ))
}

// ═══════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════

pub struct HackerNewsReader {
    client: Arc<ApiClient>,
    config: HackerNewsConfig,
}

#[async_trait]
impl Reader for HackerNewsReader {
    async fn read_all(&self) -> Result<Vec<Value>> {
        let response = self.client.get_json("/topstories.json", &[]).await?;
        let ids: Vec<i64> = response
            .as_array()
            .context("topstories response is not an array")?
            .iter()
            .filter_map(|v| v.as_i64())
            .collect();

        let mut limit = self.config.max_stories;
        if let Some(export_limit) = self.config.export_limit {
            limit = limit.min(export_limit);
        }
        let ids = &ids[..ids.len().min(limit)];

        let mut records = Vec::new();
        for batch in ids.chunks(self.config.fetch_batch_size.max(1)) {
            let mut handles = Vec::new();
            for &id in batch {
                let client = Arc::clone(&self.client);
                handles.push(tokio::spawn(async move {
                    client.get_json(&format!("/item/{}.json", id), &[]).await
                }));
            }
            for (&id, handle) in batch.iter().zip(handles) {
                match handle.await? {
                    Ok(item) => {
                        // dead ids come back as JSON null and fall out here
                        let is_story = item["type"].as_str() == Some("story");
                        let deleted = item["deleted"].as_bool().unwrap_or(false);
                        if is_story && !deleted {
                            records.push(item);
                        }
                    }
                    Err(e) => {
                        eprintln!("Warning: failed to fetch story {}: {:#}", id, e);
                    }
                }
            }
        }

        Ok(records)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════════════

pub struct HackerNewsParser;

impl Parser for HackerNewsParser {
    fn parse(&self, record: &Value) -> Result<SourceItem> {
        let id = record["id"]
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("story has no id"))?;
        let title = record["title"].as_str().unwrap_or_default();
        let text = record["text"].as_str().unwrap_or_default();
        let body = if text.is_empty() {
            title.to_string()
        } else {
            format!("{}\n{}", title, text)
        };

        let created = Utc
            .timestamp_opt(record["time"].as_i64().unwrap_or(0), 0)
            .unwrap();
        let url = record["url"].as_str().map(str::to_string);
        let author = record["by"].as_str().map(str::to_string);

        let mut metadata = json!({
            "datasource": "hackernews",
            "type": "story",
            "page_id": id.to_string(),
            "story_id": id,
            "title": title,
            "created_time": created.to_rfc3339(),
            "created_date": created.format("%Y-%m-%d").to_string(),
        });
        if let Some(by) = &author {
            metadata["author"] = json!(by);
        }
        if let Some(u) = &url {
            metadata["url"] = json!(u);
        }
        if let Some(score) = record["score"].as_i64() {
            metadata["score"] = json!(score);
        }
        if let Some(descendants) = record["descendants"].as_i64() {
            metadata["descendants"] = json!(descendants);
        }

        Ok(SourceItem {
            source: "hackernews".to_string(),
            source_id: id.to_string(),
            source_url: url,
            title: Some(title.to_string()),
            author,
            created_at: created,
            updated_at: created,
            content_type: "text/markdown".to_string(),
            body,
            metadata_json: metadata.to_string(),
        })
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────
