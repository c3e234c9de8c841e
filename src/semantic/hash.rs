//! Feature-hashing embedder.
//!
//! Tokens (lowercased alphanumeric runs) are hashed with CRC32 into a fixed
//! number of signed buckets and the counts are L2-normalized. Needs no model
//! files, is stable across processes and platforms, and captures plain
//! lexical overlap only.

use crate::semantic::embeddings::{Embedder, Embedding, EmbeddingError};

/// Default bucket count
pub const DEFAULT_HASH_DIMENSIONS: usize = 384;

const MODEL_PREFIX: &str = "hash";

pub struct HashEmbedder {
    dimensions: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("{MODEL_PREFIX}-{dimensions}"),
        }
    }

    /// Resolve `hash` / `hash-<dims>`; `Ok(None)` for any other model name.
    pub fn from_model_name(name: &str) -> Result<Option<Self>, EmbeddingError> {
        let name = name.trim().to_lowercase();

        if name == MODEL_PREFIX {
            return Ok(Some(Self::new(DEFAULT_HASH_DIMENSIONS)));
        }

        let Some(dims) = name.strip_prefix("hash-") else {
            return Ok(None);
        };

        match dims.parse::<usize>() {
            Ok(dims) if dims > 0 => Ok(Some(Self::new(dims))),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "hash embedder needs a positive dimension, got '{name}'"
            ))),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(|token| token.to_lowercase())
    }

    /// Bucket and sign for a token. Multiply-shift keeps the bucket spread
    /// independent of the low bit, which carries the sign.
    fn slot(&self, token: &str) -> (usize, f32) {
        let hash = crc32fast::hash(token.as_bytes());
        let bucket = ((hash as u64 * self.dimensions as u64) >> 32) as usize;
        let sign = if hash & 1 == 1 { -1.0 } else { 1.0 };
        (bucket, sign)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimensions];
        let mut seen_token = false;

        for token in Self::tokens(text) {
            let (bucket, sign) = self.slot(&token);
            vector[bucket] += sign;
            seen_token = true;
        }

        // punctuation-only text still gets a stable vector
        if !seen_token {
            let (bucket, sign) = self.slot(text);
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            // every token cancelled out against another
            let (bucket, sign) = self.slot(text);
            vector.iter_mut().for_each(|x| *x = 0.0);
            vector[bucket] = sign;
            return Ok(vector);
        }

        vector.iter_mut().for_each(|x| *x /= norm);
        Ok(vector)
    }
}
