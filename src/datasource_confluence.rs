//! Confluence datasource.
//!
//! Walks every global space on the instance and pages through its
//! content with offset pagination, expanding `body.view` and
//! `history.lastUpdated` so a page arrives with its HTML body and edit
//! times in one request. A space that fails to list is skipped with a
//! warning; pages already collected from other spaces survive.
//!
//! # Configuration
//!
//! ```json
//! "datasources": {
//!   "confluence": { "base_url": "https://wiki.example.com", "export_limit": 500 }
//! }
//! ```
//!
//! Credentials come from `username`/`password` in the section or from
//! the `CONFLUENCE_USERNAME` / `CONFLUENCE_PASSWORD` environment
//! variables.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::config::ConfluenceConfig;
use crate::http::{ApiClient, Auth};
use crate::models::SourceItem;
use crate::traits::{BasicManager, Parser, Reader};

/// Pages fetched per pagination request.
const PAGE_BATCH: usize = 50;

pub fn manager(config: &ConfluenceConfig) -> Result<BasicManager> {
    let username = config
        .username
        .clone()
        .or_else(|| std::env::var("CONFLUENCE_USERNAME").ok());
    let password = config
        .password
        .clone()
        .or_else(|| std::env::var("CONFLUENCE_PASSWORD").ok());
    let (username, password) = match (username, password) {
        (Some(u), Some(p)) => (u, p),
        _ => anyhow::bail!(
            "Confluence credentials not set; configure datasources.confluence.username/password \
             or export CONFLUENCE_USERNAME and CONFLUENCE_PASSWORD"
        ),
    };

    let client =
        ApiClient::new(&config.base_url)?.with_auth(Auth::Basic { username, password });

    Ok(BasicManager::new(
        "confluence",
        "Pages from Confluence global spaces",
        Box::new(ConfluenceReader {
            client,
            export_limit: config.export_limit,
        }),
        Box::new(ConfluenceParser {
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }),
    ))
}

// ═══════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════

pub struct ConfluenceReader {
    client: ApiClient,
    export_limit: Option<usize>,
}

impl ConfluenceReader {
    async fn list_global_spaces(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get_json(
                "/rest/api/space",
                &[
                    ("type", "global".to_string()),
                    ("start", "0".to_string()),
                    ("limit", "500".to_string()),
                ],
            )
            .await?;
        let keys = response["results"]
            .as_array()
            .map(|spaces| {
                spaces
                    .iter()
                    .filter_map(|s| s["key"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(keys)
    }

    async fn fetch_page_batch(&self, space_key: &str, start: usize) -> Result<Vec<Value>> {
        let response = self
            .client
            .get_json(
                "/rest/api/content",
                &[
                    ("spaceKey", space_key.to_string()),
                    ("type", "page".to_string()),
                    ("start", start.to_string()),
                    ("limit", PAGE_BATCH.to_string()),
                    ("expand", "body.view,history.lastUpdated".to_string()),
                ],
            )
            .await?;
        Ok(response["results"]
            .as_array()
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl Reader for ConfluenceReader {
    async fn read_all(&self) -> Result<Vec<Value>> {
        let spaces = self.list_global_spaces().await?;

        let mut records = Vec::new();
        'spaces: for space_key in &spaces {
            let mut start = 0usize;
            loop {
                let batch = match self.fetch_page_batch(space_key, start).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        eprintln!(
                            "Warning: failed to list pages in space {}: {:#}",
                            space_key, e
                        );
                        continue 'spaces;
                    }
                };
                if batch.is_empty() {
                    break;
                }
                start += batch.len();

                for page in batch {
                    records.push(page);
                    if let Some(limit) = self.export_limit {
                        if records.len() >= limit {
                            break 'spaces;
                        }
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

pub struct ConfluenceParser {
    base_url: String,
}

impl Parser for ConfluenceParser {
    fn parse(&self, record: &Value) -> Result<SourceItem> {
        let id = record["id"]
            .as_str()
            .map(str::to_string)
            .or_else(|| record["id"].as_i64().map(|n| n.to_string()))
            .ok_or_else(|| anyhow::anyhow!("page has no id"))?;
        let title = record["title"].as_str().unwrap_or_default().to_string();
        let body = record["body"]["view"]["value"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        // "/rest/api/space/ENG" -> "ENG"
        let space = record["_expandable"]["space"]
            .as_str()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        let url = record["_links"]["webui"]
            .as_str()
            .map(|webui| format!("{}{}", self.base_url, webui));

        let created_raw = record["history"]["createdDate"].as_str();
        let edited_raw = record["history"]["lastUpdated"]["when"].as_str();
        let author = record["history"]["createdBy"]["displayName"]
            .as_str()
            .map(str::to_string);

        let created = created_raw
            .and_then(parse_time)
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
        let updated = edited_raw.and_then(parse_time).unwrap_or(created);

        let mut metadata = json!({
            "datasource": "confluence",
            "type": "page",
            "format": "md",
            "page_id": id.clone(),
            "title": title.clone(),
        });
        if !space.is_empty() {
            metadata["space"] = json!(space);
        }
        if let Some(u) = &url {
            metadata["url"] = json!(u);
        }
        if let Some(t) = created_raw {
            metadata["created_time"] = json!(t);
        }
        if let Some(t) = edited_raw {
            metadata["last_edited_time"] = json!(t);
        }
        if let Some(name) = &author {
            metadata["author"] = json!(name);
        }

        Ok(SourceItem {
            source: "confluence".to_string(),
            source_id: id,
            source_url: url,
            title: Some(title),
            author,
            created_at: created,
            updated_at: updated,
            content_type: "text/markdown".to_string(),
            body,
            metadata_json: metadata.to_string(),
        })
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ─── Tests ─────────────────────────────────────────────────────────────
