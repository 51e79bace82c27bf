use super::Embedder;
use crate::knowledge::{normalize_vector, Vector};
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

const DEFAULT_DIMENSIONS: usize = 512;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "i", "in", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "was", "what", "with", "you",
];

/// Offline embedder based on feature hashing of lowercase word tokens.
///
/// Tokens are bucketed by their SHA-256 digest, so vectors stay stable across runs
/// and toolchains and stored vectors remain comparable. Good enough for
/// keyword-level retrieval over a small corpus; swap in a model-backed [`Embedder`]
/// for semantic search.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed_one(&self, text: &str) -> Vector {
        let mut v = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let h = token_hash(&token);
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize_vector(&v)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let e = HashingEmbedder::default();
        let a = e.embed_one("Spaced repetition helps memory");
        let b = e.embed_one("spaced REPETITION helps memory!");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let e = HashingEmbedder::default();
        let query = e.embed_one("pomodoro timer breaks");
        let close = e.embed_one("The Pomodoro technique uses a timer and short breaks");
        let far = e.embed_one("Cornell note-taking divides the page into columns");
        let s_close = cosine_similarity(&query, &close).unwrap();
        let s_far = cosine_similarity(&query, &far).unwrap();
        assert!(s_close > s_far);
    }

    #[test]
    fn test_bucket_is_stable_sha256() {
        let e = HashingEmbedder::new(64);
        let v = e.embed_one("alpha");
        assert_eq!(v[30], -1.0);
        assert_eq!(v.iter().filter(|x| **x != 0.0).count(), 1);
        assert_eq!(e.embed_one("Pomodoro")[62], -1.0);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(8);
        assert_eq!(e.embed_one("the and of"), vec![0.0; 8]);
    }

    #[test]
    fn test_batch_preserves_order() {
        let e = HashingEmbedder::new(64);
        let out = tokio_test::block_on(e.embed(&["alpha".to_string(), "beta".to_string()])).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], e.embed_one("alpha"));
        assert_eq!(out[1], e.embed_one("beta"));
    }
}
