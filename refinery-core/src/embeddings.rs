//! Text embedding providers used by fuzzy deduplication.
//!
//! `LocalEmbedder` (hashed term frequencies) is always available and fully
//! deterministic. `FastEmbedder` runs a pretrained sentence model through
//! `fastembed` and is only compiled with the `semantic-search` feature.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maps text to a fixed-size vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// Which embedder the deduplicator should build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" (default) or "fastembed".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name for providers that load one.
    #[serde(default)]
    pub model: Option<String>,
    /// Vector size for the local embedder.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_provider() -> String {
    "local".into()
}

fn default_dimensions() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dimensions: default_dimensions(),
        }
    }
}

/// Hashed term-frequency embedder. Identical texts always produce identical vectors.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

/// djb2
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }
        if tf.is_empty() {
            return vector;
        }

        for (term, count) in &tf {
            vector[simple_hash(term) % self.dimensions] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// Pretrained sentence embeddings via ONNX (all-MiniLM-L6-v2 by default).
#[cfg(feature = "semantic-search")]
pub struct FastEmbedder {
    model: fastembed::TextEmbedding,
    dims: usize,
}

#[cfg(feature = "semantic-search")]
impl FastEmbedder {
    pub fn new(model_name: Option<&str>) -> Result<Self, ConfigurationError> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model_enum = match model_name {
            Some("all-MiniLM-L6-v2") | None => EmbeddingModel::AllMiniLML6V2,
            Some("bge-small-en-v1.5") => EmbeddingModel::BGESmallENV15,
            Some("bge-base-en-v1.5") => EmbeddingModel::BGEBaseENV15,
            Some(other) => {
                return Err(ConfigurationError::InvalidChoice {
                    option: "embedding.model".into(),
                    value: other.into(),
                    expected: "all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5".into(),
                });
            }
        };

        let model = TextEmbedding::try_new(InitOptions {
            model_name: model_enum,
            show_download_progress: false,
            ..Default::default()
        })
        .map_err(|e| ConfigurationError::EmbeddingModel {
            message: e.to_string(),
        })?;

        let sample = model
            .embed(vec!["dimension check"], None)
            .map_err(|e| ConfigurationError::EmbeddingModel {
                message: e.to_string(),
            })?;
        let dims = sample.first().map(|v| v.len()).unwrap_or(384);

        Ok(Self { model, dims })
    }
}

#[cfg(feature = "semantic-search")]
impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        match self.model.embed(vec![text], None) {
            Ok(embeddings) => embeddings
                .into_iter()
                .next()
                .unwrap_or_else(|| vec![0.0; self.dims]),
            Err(e) => {
                tracing::warn!(error = %e, "FastEmbed error, returning zero vector");
                vec![0.0; self.dims]
            }
        }
    }

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        match self.model.embed(texts.to_vec(), None) {
            Ok(embeddings) => embeddings,
            Err(e) => {
                tracing::warn!(error = %e, "FastEmbed batch error, returning zero vectors");
                texts.iter().map(|_| vec![0.0; self.dims]).collect()
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

/// Build the embedder named by `config`.
///
/// A model that cannot be loaded is a configuration error; there is no silent
/// fallback to another provider.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, ConfigurationError> {
    match config.provider.as_str() {
        "local" => {
            if config.dimensions == 0 {
                return Err(ConfigurationError::out_of_range(
                    "embedding.dimensions",
                    0.0,
                    1.0,
                    f64::from(u32::MAX),
                ));
            }
            Ok(Box::new(LocalEmbedder::new(config.dimensions)))
        }
        #[cfg(feature = "semantic-search")]
        "fastembed" => Ok(Box::new(FastEmbedder::new(config.model.as_deref())?)),
        #[cfg(not(feature = "semantic-search"))]
        "fastembed" => Err(ConfigurationError::EmbeddingModel {
            message: "built without the 'semantic-search' feature".into(),
        }),
        other => Err(ConfigurationError::InvalidChoice {
            option: "embedding.provider".into(),
            value: other.into(),
            expected: "local, fastembed".into(),
        }),
    }
}

/// Cosine similarity in f64. Mismatched lengths or zero vectors give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
