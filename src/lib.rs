//! # Doc Siphon
//!
//! A configuration-driven extraction pipeline that pulls documents out of
//! wikis, APIs, and local files into one searchable corpus.
//!
//! Doc Siphon pairs a paginated, rate-limited reader with a parser for each
//! datasource (Notion, Confluence, local PDFs, the German Bundestag, Hacker
//! News), normalizes every record into a uniform document, then chunks,
//! embeds, and indexes the result in SQLite for keyword, semantic, and
//! hybrid search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────┐
//! │ Datasources  │──▶│  Pipeline   │──▶│  SQLite   │
//! │ wikis/APIs/  │   │ Chunk+Embed │   │ FTS5+Vec  │
//! │ local files  │   └─────────────┘   └─────┬─────┘
//! └──────────────┘                           │
//!                                            ▼
//!                                      ┌───────────┐
//!                                      │    CLI    │
//!                                      │ (siphon)  │
//!                                      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! siphon init                       # create database
//! siphon sources                    # list configured datasources
//! siphon sync                       # extract every datasource
//! siphon sync hackernews --limit 20 # extract one datasource
//! siphon embed pending              # generate embeddings
//! siphon search "deployment" --mode hybrid
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | JSON configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | Reader/parser traits and the datasource registry |
//! | [`http`] | Shared rate-limited HTTP client |
//! | [`datasource_notion`] | Notion workspace datasource |
//! | [`datasource_confluence`] | Confluence wiki datasource |
//! | [`datasource_pdf`] | Local PDF/DOCX/PPTX directory datasource |
//! | [`datasource_bundestag`] | German Bundestag datasource |
//! | [`datasource_hackernews`] | Hacker News datasource |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod datasource_bundestag;
pub mod datasource_confluence;
pub mod datasource_hackernews;
pub mod datasource_notion;
pub mod datasource_pdf;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod export;
pub mod extract;
pub mod get;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod search;
pub mod sources;
pub mod stats;
pub mod text;
pub mod traits;
