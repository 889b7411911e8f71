//! Datasource extension traits and the manager registry.
//!
//! Every datasource is a [`Reader`] paired with a [`Parser`]. The reader
//! pulls raw records from an external API or the filesystem; the parser
//! maps each record to a [`SourceItem`]. A [`BasicManager`] composes the
//! two into the extraction pipeline that `siphon sync` runs, and the
//! [`DatasourceRegistry`] holds one manager per configured datasource.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 DatasourceRegistry                  │
//! │  ┌────────┐ ┌──────────┐ ┌─────┐ ┌─────────┐ ┌───┐ │
//! │  │ notion │ │confluence│ │ pdf │ │bundestag│ │ hn│ │
//! │  └────────┘ └──────────┘ └─────┘ └─────────┘ └───┘ │
//! └─────────────────────┬───────────────────────────────┘
//!                       ▼
//!     Reader::read_all → Parser::parse → clean → drop blank
//!                       ▼
//!                run_sync() → ingest pipeline
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use doc_siphon::config::Config;
//! use doc_siphon::traits::DatasourceRegistry;
//!
//! # fn example(config: &Config) -> anyhow::Result<()> {
//! let registry = DatasourceRegistry::from_config(config)?;
//! for manager in registry.managers() {
//!     println!("{}: {}", manager.name(), manager.description());
//! }
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::models::SourceItem;
use crate::text;

// ═══════════════════════════════════════════════════════════════════════
// Reader Trait
// ═══════════════════════════════════════════════════════════════════════

/// Fetches raw records from one external source.
///
/// A reader owns the transport details of its datasource: pagination
/// cursors, rate limiting, batched concurrent fetches, and the export
/// limit that caps how many records one run may return. It knows nothing
/// about document structure; records leave the reader as the untyped JSON
/// the remote API produced.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use doc_siphon::traits::Reader;
/// use serde_json::{json, Value};
///
/// pub struct StaticReader;
///
/// #[async_trait]
/// impl Reader for StaticReader {
///     async fn read_all(&self) -> Result<Vec<Value>> {
///         Ok(vec![json!({ "id": "1", "body": "hello" })])
///     }
/// }
/// ```
#[async_trait]
pub trait Reader: Send + Sync {
    /// Fetch every record the datasource currently offers, up to the
    /// configured export limit.
    ///
    /// Pagination stops when the source signals completion, when the
    /// returned cursor is empty or unchanged, or when the export limit
    /// is reached. Called on the tokio runtime; may perform HTTP
    /// requests and file reads.
    async fn read_all(&self) -> Result<Vec<Value>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Parser Trait
// ═══════════════════════════════════════════════════════════════════════

/// Maps one raw record to a uniform [`SourceItem`].
///
/// The parser owns everything schema-specific: which JSON fields hold the
/// text, how timestamps are encoded, and which source fields become
/// metadata. Every produced item carries the datasource tag in both its
/// `source` field and its metadata map.
///
/// Parsers are infallible-by-record at the pipeline level: when `parse`
/// returns an error for one record, the manager logs a warning and moves
/// on to the next record.
pub trait Parser: Send + Sync {
    /// Convert a raw record into a [`SourceItem`].
    ///
    /// # Errors
    ///
    /// Returns an error when the record lacks the fields required to
    /// form a document (no id, no usable text).
    fn parse(&self, record: &Value) -> Result<SourceItem>;
}

// ═══════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════

/// One configured datasource: a named reader/parser pair.
#[async_trait]
pub trait DatasourceManager: Send + Sync {
    /// Returns the datasource tag (e.g. `"notion"`, `"bundestag"`).
    ///
    /// Used as the `source` label on stored documents and as the key
    /// for `siphon sync <name>`.
    fn name(&self) -> &str;

    /// Returns a one-line description shown in `siphon sources` output.
    fn description(&self) -> &str;

    /// Run the full extraction for this datasource and return the
    /// surviving documents.
    async fn full_refresh(&self) -> Result<Vec<SourceItem>>;
}

/// Standard manager implementation: read, parse, clean, drop blanks.
///
/// The pipeline is deliberately forgiving. A record that fails to parse
/// is logged and skipped rather than aborting the run, and a document
/// whose body is empty after cleanup is dropped silently. Only a reader
/// failure (the source itself is unreachable) propagates as an error.
pub struct BasicManager {
    name: String,
    description: String,
    reader: Box<dyn Reader>,
    parser: Box<dyn Parser>,
}

impl BasicManager {
    pub fn new(
        name: &str,
        description: &str,
        reader: Box<dyn Reader>,
        parser: Box<dyn Parser>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            reader,
            parser,
        }
    }
}

#[async_trait]
impl DatasourceManager for BasicManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn full_refresh(&self) -> Result<Vec<SourceItem>> {
        let records = self.reader.read_all().await?;

        let mut items = Vec::new();
        let mut parse_failures = 0usize;
        let mut dropped_blank = 0usize;

        for record in &records {
            let mut item = match self.parser.parse(record) {
                Ok(item) => item,
                Err(e) => {
                    eprintln!("Warning: [{}] failed to parse record: {:#}", self.name, e);
                    parse_failures += 1;
                    continue;
                }
            };

            item.body = text::clean_markdown(&item.body);
            if text::is_blank(&item.body) {
                dropped_blank += 1;
                continue;
            }

            items.push(item);
        }

        if parse_failures > 0 || dropped_blank > 0 {
            eprintln!(
                "Warning: [{}] skipped {} unparseable and {} empty records",
                self.name, parse_failures, dropped_blank
            );
        }

        Ok(items)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of datasource managers, keyed by datasource name.
///
/// Use [`DatasourceRegistry::from_config`] to create a registry holding
/// one manager per configured datasource section, then optionally call
/// [`register`](DatasourceRegistry::register) to add custom ones.
pub struct DatasourceRegistry {
    managers: Vec<Box<dyn DatasourceManager>>,
}

impl DatasourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            managers: Vec::new(),
        }
    }

    /// Create a registry holding a manager for every datasource section
    /// present in the config, in the order they are synced.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        let ds = &config.datasources;

        if let Some(cfg) = &ds.notion {
            registry.register(Box::new(crate::datasource_notion::manager(cfg)?));
        }
        if let Some(cfg) = &ds.confluence {
            registry.register(Box::new(crate::datasource_confluence::manager(cfg)?));
        }
        if let Some(cfg) = &ds.pdf {
            registry.register(Box::new(crate::datasource_pdf::manager(cfg)?));
        }
        if let Some(cfg) = &ds.bundestag {
            registry.register(Box::new(crate::datasource_bundestag::manager(cfg)?));
        }
        if let Some(cfg) = &ds.hackernews {
            registry.register(Box::new(crate::datasource_hackernews::manager(cfg)?));
        }

        Ok(registry)
    }

    /// Register a manager. A manager registered under an already-present
    /// name replaces the earlier one.
    pub fn register(&mut self, manager: Box<dyn DatasourceManager>) {
        if let Some(pos) = self
            .managers
            .iter()
            .position(|m| m.name() == manager.name())
        {
            self.managers[pos] = manager;
        } else {
            self.managers.push(manager);
        }
    }

    /// Get all registered managers in registration order.
    pub fn managers(&self) -> &[Box<dyn DatasourceManager>] {
        &self.managers
    }

    /// Find a manager by datasource name.
    pub fn find(&self, name: &str) -> Option<&dyn DatasourceManager> {
        self.managers
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    /// Names of all registered datasources, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.managers.iter().map(|m| m.name()).collect()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Return the count of registered managers.
    pub fn len(&self) -> usize {
        self.managers.len()
    }
}

impl Default for DatasourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    struct InMemoryReader {
        records: Vec<Value>,
    }

    #[async_trait]
    impl Reader for InMemoryReader {
        async fn read_all(&self) -> Result<Vec<Value>> {
            Ok(self.records.clone())
        }
    }

    struct FieldParser;

    impl Parser for FieldParser {
        fn parse(&self, record: &Value) -> Result<SourceItem> {
            let id = record["id"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("record has no id"))?;
            let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
            Ok(SourceItem {
                source: "memory".to_string(),
                source_id: id.to_string(),
                source_url: None,
                title: record["title"].as_str().map(|s| s.to_string()),
                author: None,
                created_at: ts,
                updated_at: ts,
                content_type: "md".to_string(),
                body: record["body"].as_str().unwrap_or_default().to_string(),
                metadata_json: json!({ "datasource": "memory" }).to_string(),
            })
        }
    }

    fn manager_with(records: Vec<Value>) -> BasicManager {
        BasicManager::new(
            "memory",
            "In-memory test datasource",
            Box::new(InMemoryReader { records }),
            Box::new(FieldParser),
        )
    }

    #[tokio::test]
    async fn refresh_keeps_parsed_documents() {
        let mgr = manager_with(vec![
            json!({ "id": "a", "title": "First", "body": "Some text." }),
            json!({ "id": "b", "title": "Second", "body": "More text." }),
        ]);
        let items = mgr.full_refresh().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_id, "a");
        assert_eq!(items[1].title.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn refresh_skips_unparseable_records() {
        let mgr = manager_with(vec![
            json!({ "title": "no id here", "body": "text" }),
            json!({ "id": "ok", "body": "kept" }),
        ]);
        let items = mgr.full_refresh().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "ok");
    }

    #[tokio::test]
    async fn refresh_drops_documents_blank_after_cleanup() {
        let mgr = manager_with(vec![
            json!({ "id": "blank", "body": "   \n\n  " }),
            json!({ "id": "comment-only", "body": "<!-- nothing else -->" }),
            json!({ "id": "real", "body": "Actual content." }),
        ]);
        let items = mgr.full_refresh().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "real");
    }

    #[tokio::test]
    async fn refresh_cleans_body_markup() {
        let mgr = manager_with(vec![json!({
            "id": "html",
            "body": "<p>Hello <b>world</b></p><!-- comment -->"
        })]);
        let items = mgr.full_refresh().await.unwrap();
        assert_eq!(items[0].body, "Hello **world**");
    }

    #[test]
    fn registry_finds_by_name_and_replaces_duplicates() {
        let mut registry = DatasourceRegistry::new();
        registry.register(Box::new(manager_with(vec![])));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["memory"]);
        assert!(registry.find("memory").is_some());
        assert!(registry.find("nope").is_none());

        // same name again: replaced, not appended
        registry.register(Box::new(manager_with(vec![])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_config_yields_empty_registry() {
        let config: Config = serde_json::from_str(
            r#"{ "db": { "path": "/tmp/x.db" }, "chunking": { "max_tokens": 400 } }"#,
        )
        .unwrap();
        let registry = DatasourceRegistry::from_config(&config).unwrap();
        assert!(registry.is_empty());
    }
}
