//! Local document directory datasource.
//!
//! Scans a directory for PDF (and optionally DOCX/PPTX) files, extracts
//! their text, and yields one document per file. The reader only lists
//! files; byte reading and text extraction happen at parse time so a
//! single corrupt file is skipped without aborting the run.
//!
//! # Configuration
//!
//! ```json
//! "datasources": {
//!   "pdf": { "base_path": "./documents", "export_limit": 100 }
//! }
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{json, Value};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::PdfConfig;
use crate::extract;
use crate::models::SourceItem;
use crate::traits::{BasicManager, Parser, Reader};

pub fn manager(config: &PdfConfig) -> Result<BasicManager> {
    Ok(BasicManager::new(
        "pdf",
        "Documents from a local directory (PDF, DOCX, PPTX)",
        Box::new(PdfReader::new(config)?),
        Box::new(PdfParser),
    ))
}

// ═══════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════

pub struct PdfReader {
    config: PdfConfig,
    include_set: GlobSet,
}

impl PdfReader {
    pub fn new(config: &PdfConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            include_set: build_globset(&config.include_globs)?,
        })
    }
}

#[async_trait]
impl Reader for PdfReader {
    async fn read_all(&self) -> Result<Vec<Value>> {
        let root = &self.config.base_path;
        if !root.exists() {
            bail!("PDF base path does not exist: {}", root.display());
        }

        let mut records = Vec::new();

        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if !self.include_set.is_match(&rel_str) {
                continue;
            }
            if extract::content_type_for_path(path).is_none() {
                continue;
            }

            let metadata = std::fs::metadata(path)?;
            let modified = file_time_secs(metadata.modified().ok());
            // created() is unsupported on some filesystems
            let created = match metadata.created() {
                Ok(t) => file_time_secs(Some(t)),
                Err(_) => modified,
            };

            records.push(json!({
                "path": path.to_string_lossy(),
                "relative_path": rel_str,
                "modified": modified,
                "created": created,
            }));
        }

        // Sort for deterministic ordering
        records.sort_by(|a, b| {
            a["relative_path"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["relative_path"].as_str().unwrap_or_default())
        });

        if let Some(limit) = self.config.export_limit {
            records.truncate(limit);
        }

        Ok(records)
    }
}

fn file_time_secs(time: Option<std::time::SystemTime>) -> i64 {
    time.unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ═══════════════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════════════

pub struct PdfParser;

impl Parser for PdfParser {
    fn parse(&self, record: &Value) -> Result<SourceItem> {
        let path_str = record["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("record has no path"))?;
        let path = Path::new(path_str);

        let content_type = extract::content_type_for_path(path)
            .ok_or_else(|| anyhow::anyhow!("unsupported file type: {}", path.display()))?;
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let body = extract::extract_text(&bytes, content_type)
            .with_context(|| format!("Failed to extract text from {}", path.display()))?;

        let relative = record["relative_path"]
            .as_str()
            .unwrap_or(path_str)
            .to_string();
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| relative.clone());
        let format = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "pdf".to_string());

        let modified = record["modified"].as_i64().unwrap_or(0);
        let created = record["created"].as_i64().unwrap_or(modified);

        let metadata = json!({
            "datasource": "pdf",
            "format": format,
            "title": title.clone(),
            "created_date": format_date(created),
            "last_edited_date": format_date(modified),
            "relative_path": relative.clone(),
        });

        Ok(SourceItem {
            source: "pdf".to_string(),
            source_id: relative,
            source_url: None,
            title: Some(title),
            author: None,
            created_at: Utc.timestamp_opt(created, 0).unwrap(),
            updated_at: Utc.timestamp_opt(modified, 0).unwrap(),
            content_type: content_type.to_string(),
            body,
            metadata_json: metadata.to_string(),
        })
    }
}

fn format_date(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .unwrap()
        .format("%Y-%m-%d")
        .to_string()
}

// ─── Tests ─────────────────────────────────────────────────────────────
