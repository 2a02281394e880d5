use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub segmenting: SegmentingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentingConfig {
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for SegmentingConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

impl SegmentingConfig {
    /// Policy identity recorded on every segment row. Same version ⇒
    /// byte-identical segmentation of the same text.
    pub fn version(&self) -> String {
        format!("v1_fixed_{}_{}", self.window_chars, self.overlap_chars)
    }
}

fn default_window_chars() -> usize {
    800
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: i64,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: default_overfetch_factor(),
            snippet_chars: default_snippet_chars(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_overfetch_factor() -> i64 {
    4
}
fn default_snippet_chars() -> usize {
    240
}
fn default_final_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
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

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_concurrency: default_page_concurrency(),
        }
    }
}

fn default_page_concurrency() -> usize {
    4
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.segmenting.window_chars == 0 {
        anyhow::bail!("segmenting.window_chars must be > 0");
    }
    if config.segmenting.overlap_chars >= config.segmenting.window_chars {
        anyhow::bail!("segmenting.overlap_chars must be smaller than window_chars");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.overfetch_factor < 1 {
        anyhow::bail!("retrieval.overfetch_factor must be >= 1");
    }

    if config.ingest.page_concurrency == 0 {
        anyhow::bail!("ingest.page_concurrency must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
            && config.embedding.model.is_none()
        {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }

    Ok(config)
}
