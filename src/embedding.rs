//! Embedding gateway abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] metadata trait and the gateway
//! backends:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashProvider`]** — deterministic offline pseudo-embeddings for tests
//!   and air-gapped deployments; no network calls at all.
//!
//! Also provides vector utilities for BLOB storage:
//! - [`cosine_similarity`] — compute similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The HTTP backends distinguish retriable from fatal failures:
//! - HTTP 429 (rate limited), 5xx (server error), and network errors → retry
//! - other HTTP 4xx (malformed input, bad credentials) → fail immediately
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Exhausted retries surface as [`EmbedError::Unavailable`]; callers decide
//! whether that means a page-level failure (ingestion) or a fail-closed
//! search error.

use std::time::Duration;

use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Failure classes of the embedding gateway.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Transient outage: retries exhausted or the provider is unreachable.
    #[error("embedding gateway unavailable: {0}")]
    Unavailable(String),

    /// The request itself was rejected; retrying cannot help.
    #[error("embedding request rejected: {0}")]
    Fatal(String),

    /// No provider is configured.
    #[error("embedding provider is disabled")]
    Disabled,
}

/// Metadata interface implemented by every embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
}

/// Embed a batch of texts using the configured provider.
///
/// Returns one vector per input text, in input order.
pub async fn embed_texts(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        "hash" => Ok(embed_hash(config, texts)),
        "disabled" => Err(EmbedError::Disabled),
        other => Err(EmbedError::Fatal(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Embed a single query text.
///
/// Convenience wrapper around [`embed_texts`] for search queries.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>, EmbedError> {
    let texts = [text.to_string()];
    let results = embed_texts(config, &texts).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::Unavailable("empty embedding response".to_string()))
}

// ============ Disabled Provider ============

/// A no-op provider that always returns errors.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

/// Gateway backend using the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EmbedError::Fatal("embedding.model required for OpenAI provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| EmbedError::Fatal("embedding.dims required for OpenAI provider".into()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EmbedError::Fatal(
                "OPENAI_API_KEY environment variable not set".into(),
            ));
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| EmbedError::Fatal("OPENAI_API_KEY not set".into()))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| EmbedError::Fatal("embedding.model required".into()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbedError::Fatal(e.to_string()))?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
                    return parse_openai_response(&json);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(format!("OpenAI API error {}: {}", status, body_text));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                return Err(EmbedError::Fatal(format!(
                    "OpenAI API error {}: {}",
                    status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(e.to_string());
                continue;
            }
        }
    }

    Err(EmbedError::Unavailable(
        last_err.unwrap_or_else(|| "embedding failed after retries".to_string()),
    ))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Fatal("invalid OpenAI response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Fatal("invalid OpenAI response: missing embedding".into()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Ollama Provider ============

/// Gateway backend calling a local Ollama instance's `/api/embed` endpoint.
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EmbedError::Fatal("embedding.model required for Ollama provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| EmbedError::Fatal("embedding.dims required for Ollama provider".into()))?;

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| EmbedError::Fatal("embedding.model required".into()))?;

    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbedError::Fatal(e.to_string()))?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/embed", url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
                    return parse_ollama_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(format!("Ollama API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                return Err(EmbedError::Fatal(format!(
                    "Ollama API error {}: {}",
                    status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    url, e
                ));
                continue;
            }
        }
    }

    Err(EmbedError::Unavailable(
        last_err.unwrap_or_else(|| "Ollama embedding failed after retries".to_string()),
    ))
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbedError::Fatal("invalid Ollama response: missing embeddings array".into())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                EmbedError::Fatal("invalid Ollama response: embedding is not an array".into())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Hash Provider ============

/// Deterministic offline pseudo-embeddings.
///
/// Hashes lowercase character trigrams into `dims` buckets and
/// L2-normalizes the counts. Similar texts land in overlapping buckets, so
/// cosine ranking behaves sensibly enough for tests and demos without any
/// network dependency. Not a substitute for a real model in production.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let dims = config
            .dims
            .ok_or_else(|| EmbedError::Fatal("embedding.dims required for hash provider".into()))?;
        Ok(Self { dims })
    }
}

impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash-trigram"
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

fn embed_hash(config: &EmbeddingConfig, texts: &[String]) -> Vec<Vec<f32>> {
    let dims = config.dims.unwrap_or(256).max(1);
    texts.iter().map(|t| hash_embed_one(t, dims)).collect()
}

fn hash_embed_one(text: &str, dims: usize) -> Vec<f32> {
    let mut buckets = vec![0.0f32; dims];
    let chars: Vec<char> = text.to_lowercase().chars().collect();

    if chars.len() < 3 {
        if !chars.is_empty() {
            let tri: String = chars.iter().collect();
            buckets[trigram_bucket(&tri, dims)] += 1.0;
        }
    } else {
        for win in chars.windows(3) {
            let tri: String = win.iter().collect();
            buckets[trigram_bucket(&tri, dims)] += 1.0;
        }
    }

    let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut buckets {
            *v /= norm;
        }
    }
    buckets
}

// FNV-1a over the trigram bytes
fn trigram_bucket(tri: &str, dims: usize) -> usize {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in tri.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (h % dims as u64) as usize
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>, EmbedError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "hash" => Ok(Box::new(HashProvider::new(config)?)),
        other => Err(EmbedError::Fatal(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(dims),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty() {
        let sim = cosine_similarity(&[], &[]);
        assert_eq!(sim, 0.0);
    }

    #[tokio::test]
    async fn test_hash_provider_deterministic() {
        let config = hash_config(64);
        let texts = vec!["civic election results".to_string()];
        let a = embed_texts(&config, &texts).await.unwrap();
        let b = embed_texts(&config, &texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn test_hash_provider_ranks_similar_text_higher() {
        let config = hash_config(128);
        let texts = vec![
            "the harbour bridge opened to great fanfare".to_string(),
            "wheat prices fell sharply at the exchange".to_string(),
        ];
        let vecs = embed_texts(&config, &texts).await.unwrap();
        let query = embed_query(&config, "harbour bridge opening").await.unwrap();

        let sim_bridge = cosine_similarity(&query, &vecs[0]);
        let sim_wheat = cosine_similarity(&query, &vecs[1]);
        assert!(sim_bridge > sim_wheat);
    }

    #[tokio::test]
    async fn test_hash_provider_empty_text_zero_vector() {
        let config = hash_config(32);
        let vecs = embed_texts(&config, &["".to_string()]).await.unwrap();
        assert!(vecs[0].iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let config = EmbeddingConfig::default();
        let err = embed_texts(&config, &["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbedError::Disabled));
    }
}
