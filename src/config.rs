use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub datasources: DatasourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_max_chunks_per_doc() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override, used by the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// One optional section per datasource; a datasource is active when its
/// section is present.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatasourcesConfig {
    pub notion: Option<NotionConfig>,
    pub confluence: Option<ConfluenceConfig>,
    pub pdf: Option<PdfConfig>,
    pub bundestag: Option<BundestagConfig>,
    pub hackernews: Option<HackerNewsConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotionConfig {
    /// API token; falls back to the NOTION_API_TOKEN environment variable.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Optional root database whose entries seed the page/database id list.
    #[serde(default)]
    pub home_page_database_id: Option<String>,
    /// Pages exported concurrently per batch.
    #[serde(default = "default_notion_batch")]
    pub export_batch_size: usize,
    #[serde(default)]
    pub export_limit: Option<usize>,
}

fn default_notion_batch() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfluenceConfig {
    /// Instance base URL, e.g. `https://wiki.example.com`.
    pub base_url: String,
    /// Falls back to CONFLUENCE_USERNAME.
    #[serde(default)]
    pub username: Option<String>,
    /// Falls back to CONFLUENCE_PASSWORD.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub export_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PdfConfig {
    /// Directory scanned for documents.
    pub base_path: PathBuf,
    #[serde(default = "default_pdf_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub export_limit: Option<usize>,
}

fn default_pdf_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct BundestagConfig {
    /// Fetch speeches from the BundestagMine API.
    #[serde(default = "default_true")]
    pub include_bundestag_mine: bool,
    /// Fetch parliamentary documents from the DIP API.
    #[serde(default = "default_true")]
    pub include_dip: bool,
    /// DIP API key; falls back to DIP_API_KEY, then the public test key.
    #[serde(default)]
    pub dip_api_key: Option<String>,
    /// Electoral period (Wahlperiode) for DIP queries.
    #[serde(default = "default_wahlperiode")]
    pub dip_wahlperiode: u32,
    /// DIP record kinds to fetch: protocols, drucksachen, proceedings.
    #[serde(default = "default_dip_sources")]
    pub dip_sources: Vec<String>,
    /// Per-client cap: each enabled client may yield up to this many items.
    #[serde(default)]
    pub export_limit: Option<usize>,
}

fn default_true() -> bool {
    true
}
fn default_wahlperiode() -> u32 {
    21
}
fn default_dip_sources() -> Vec<String> {
    vec!["protocols".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct HackerNewsConfig {
    #[serde(default = "default_hn_base_url")]
    pub base_url: String,
    /// Top stories considered per run.
    #[serde(default = "default_max_stories")]
    pub max_stories: usize,
    /// Concurrent item fetches per batch.
    #[serde(default = "default_fetch_batch")]
    pub fetch_batch_size: usize,
    #[serde(default)]
    pub export_limit: Option<usize>,
}

fn default_hn_base_url() -> String {
    "https://hacker-news.firebaseio.com/v0".to_string()
}
fn default_max_stories() -> usize {
    20
}
fn default_fetch_batch() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate datasources
    if let Some(notion) = &config.datasources.notion {
        if notion.export_batch_size == 0 {
            anyhow::bail!("datasources.notion.export_batch_size must be >= 1");
        }
    }
    if let Some(confluence) = &config.datasources.confluence {
        if confluence.base_url.trim().is_empty() {
            anyhow::bail!("datasources.confluence.base_url must not be empty");
        }
    }
    if let Some(pdf) = &config.datasources.pdf {
        if pdf.base_path.as_os_str().is_empty() {
            anyhow::bail!("datasources.pdf.base_path must not be empty");
        }
    }
    if let Some(bundestag) = &config.datasources.bundestag {
        for source in &bundestag.dip_sources {
            match source.as_str() {
                "protocols" | "drucksachen" | "proceedings" => {}
                other => anyhow::bail!(
                    "Unknown DIP source: '{}'. Must be protocols, drucksachen, or proceedings.",
                    other
                ),
            }
        }
    }
    if let Some(hackernews) = &config.datasources.hackernews {
        if hackernews.fetch_batch_size == 0 {
            anyhow::bail!("datasources.hackernews.fetch_batch_size must be >= 1");
        }
    }

    Ok(config)
}
