//! Core data models used throughout doc-siphon.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the extraction and retrieval pipeline.

use chrono::{DateTime, Utc};

/// Uniform document produced by a datasource manager before storage.
///
/// `source` carries the datasource tag (`notion`, `confluence`, `pdf`,
/// `bundestag`, `hackernews`); `metadata_json` is a flat string-to-scalar
/// map holding the source-specific fields (electoral period, story score,
/// space key, ...).
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_type: String,
    pub body: String,
    pub metadata_json: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// One ranked document in search output.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub title: Option<String>,
    pub source: String,
    pub source_id: String,
    pub updated_at: i64,
    pub score: f64,
    pub snippet: String,
    pub source_url: Option<String>,
}
