//! Embedding backends.
//!
//! [`HashEmbedder`] is fully deterministic and dependency-free: tokens are
//! FNV-hashed into a fixed number of buckets and the result L2-normalized,
//! so identical text always produces the identical unit vector. It carries
//! no semantics beyond token overlap, which is exactly what offline runs
//! and tests need.
//!
//! [`OllamaEmbedder`] calls a local model server's embeddings endpoint for
//! real similarity quality. Host and model come from the caller (ultimately
//! the environment), never from constants.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Produces one vector per text. Implementations must be deterministic for
/// a fixed backend configuration: the index is only comparable to queries
/// embedded by the same backend.
pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

// ============================================================================
// Token-hash backend
// ============================================================================

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        HashEmbedder { dim: dim.max(1) }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            vector[(h % self.dim as u64) as usize] += 1.0;
        }
        normalize_in_place(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn normalize_in_place(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// Model-server backend
// ============================================================================

pub struct OllamaEmbedder {
    client: reqwest::blocking::Client,
    host: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(host: &str, model: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("building embedding http client")?;
        Ok(OllamaEmbedder {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.host);
        let body = serde_json::json!({ "model": self.model, "prompt": text });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("posting to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(anyhow!("embedding server returned {status}: {detail}"));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .context("parsing embedding server response")?;
        if parsed.embedding.is_empty() {
            return Err(anyhow!("embedding server returned an empty vector"));
        }
        Ok(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        // The server decides; callers compare vectors only within one
        // backend so no fixed dimension is promised here.
        0
    }
}
