use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::error::{Error, Result};

pub const EMBEDDING_DIM: usize = 384;

/// Model id for the offline feature-hashing backend. Anything else is
/// resolved as a fastembed model name.
pub const LOCAL_HASH_MODEL_ID: &str = "local-hash-v1";

/// Text-to-vector contract. Implementations are pure: identical inputs under
/// the same model id produce identical vectors, each L2-normalized so cosine
/// similarity reduces to an inner product.
pub trait EmbeddingProvider {
    fn model_id(&self) -> &str;

    /// Encode texts in input order, one unit-norm vector per text.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Resolve a provider from the configured model id. Model load failures are
/// fatal at startup; nothing here retries.
pub fn create_provider(model_id: &str) -> Result<Box<dyn EmbeddingProvider>> {
    if model_id == LOCAL_HASH_MODEL_ID {
        Ok(Box::new(HashEmbedder::default()))
    } else {
        Ok(Box::new(FastEmbedder::new(model_id)?))
    }
}

/// Deterministic local embedder: hashed token and bigram features with
/// signed weights, folded into a fixed-width vector. Useful offline and in
/// tests; similarity quality is crude but ranking is stable.
#[derive(Default)]
pub struct HashEmbedder;

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        LOCAL_HASH_MODEL_ID
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, EMBEDDING_DIM)).collect())
    }
}

fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0f32; dim];
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    for (i, word) in words.iter().enumerate() {
        accumulate_feature(&mut vector, &format!("w:{word}"));
        if let Some(next) = words.get(i + 1) {
            accumulate_feature(&mut vector, &format!("b:{word} {next}"));
        }
    }

    normalize(&mut vector);
    vector
}

fn accumulate_feature(vector: &mut [f32], feature: &str) {
    let mut hasher = DefaultHasher::new();
    feature.hash(&mut hasher);
    let h = hasher.finish();
    let slot = (h as usize) % vector.len();
    let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
    let weight = 1.0 + ((h >> 48) & 0xff) as f32 / 255.0;
    vector[slot] += sign * weight;
}

/// In-place L2 normalization; the zero vector is left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        let norm = norm as f32;
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// ONNX model backend via fastembed. The model handle is shared behind a
/// mutex; encode order is preserved.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
}

impl FastEmbedder {
    pub fn new(model_id: &str) -> Result<Self> {
        let model_enum = match model_id {
            "sentence-transformers/all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            other => {
                return Err(Error::ModelLoad(format!(
                    "unknown embedding model '{other}' (expected a 384-dim model or '{LOCAL_HASH_MODEL_ID}')"
                )))
            }
        };

        info!(model = model_id, "loading embedding model");
        let model =
            TextEmbedding::try_new(InitOptions::new(model_enum).with_show_download_progress(false))
                .map_err(|e| Error::ModelLoad(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            model_id: model_id.to_string(),
        })
    }
}

impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self.model.lock().unwrap_or_else(|p| p.into_inner());
        let raw = model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::Encode(e.to_string()))?;

        let mut out = Vec::with_capacity(raw.len());
        for mut vector in raw {
            if vector.len() != EMBEDDING_DIM {
                return Err(Error::Encode(format!(
                    "model '{}' produced {}-dim vectors, expected {EMBEDDING_DIM}",
                    self.model_id,
                    vector.len()
                )));
            }
            normalize(&mut vector);
            out.push(vector);
        }
        Ok(out)
    }
}

/// Serialize vectors as a flat little-endian f32 blob.
pub fn encode_vectors(vectors: &[Vec<f32>]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vectors.len() * EMBEDDING_DIM * 4);
    for vector in vectors {
        for value in vector {
            blob.extend_from_slice(&value.to_le_bytes());
        }
    }
    blob
}

/// Decode a flat f32 blob back into `dim`-wide vectors. Returns None on any
/// size mismatch, which callers treat as a corrupt artifact.
pub fn decode_vectors(blob: &[u8], dim: usize) -> Option<Vec<Vec<f32>>> {
    if dim == 0 || blob.len() % (dim * 4) != 0 {
        return None;
    }
    let mut vectors = Vec::with_capacity(blob.len() / (dim * 4));
    for chunk in blob.chunks_exact(dim * 4) {
        let vector: Vec<f32> = chunk
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        vectors.push(vector);
    }
    Some(vectors)
}
