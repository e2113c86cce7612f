//! Text-to-vector embedding.
//!
//! Provides the [`EmbeddingProvider`] trait and [`HashingEmbeddingProvider`], a
//! deterministic feature-hashing embedder with no model files. Nodes that arrive
//! without an embedding can be filled in with [`fill_missing_embeddings`].

use anyhow::Result;

use crate::federation::NewNode;

/// Default dimensionality of [`HashingEmbeddingProvider`].
pub const DEFAULT_DIMENSIONS: usize = 64;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Embed every node that lacks an embedding, from its title and text.
///
/// A node the provider rejects is logged and left without an embedding; the
/// store then gives it a null key. Returns the number of nodes filled.
pub fn fill_missing_embeddings(provider: &dyn EmbeddingProvider, nodes: &mut [NewNode]) -> usize {
    let mut filled = 0;
    for node in nodes.iter_mut().filter(|n| n.embedding.is_none()) {
        let text = embedding_text(node);
        match provider.embed(&text) {
            Ok(embedding) => {
                node.embedding = Some(embedding);
                filled += 1;
            }
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "embedding failed; node stays unkeyed");
            }
        }
    }
    filled
}

fn embedding_text(node: &NewNode) -> String {
    match (node.title.trim(), node.text.trim()) {
        ("", text) => text.to_string(),
        (title, "") => title.to_string(),
        (title, text) => format!("{title}\n{text}"),
    }
}

/// Bag-of-tokens embedder: each lowercase alphanumeric token is hashed (FNV-1a)
/// into a bucket with a hash-derived sign, then the vector is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        let mut tokens = 0usize;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(&token.to_lowercase());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
            tokens += 1;
        }
        anyhow::ensure!(tokens > 0, "cannot embed text without tokens");

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_embedding_is_deterministic_and_normalized() {
        let p = HashingEmbeddingProvider::new(32);
        let a = p.embed("Morton keys for federated search").unwrap();
        let b = p.embed("morton KEYS for federated search!").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_rejected() {
        let p = HashingEmbeddingProvider::default();
        assert!(p.embed("").is_err());
        assert!(p.embed("  ... ").is_err());
    }

    #[test]
    fn fill_skips_existing_and_isolates_failures() {
        let p = HashingEmbeddingProvider::new(8);
        let mut nodes = vec![
            NewNode::new("keep", "", "x").with_embedding(vec![9.0; 8]),
            NewNode::new("fill", "Title", "some body"),
            NewNode::new("empty", "", ""),
        ];
        assert_eq!(fill_missing_embeddings(&p, &mut nodes), 1);
        assert_eq!(nodes[0].embedding, Some(vec![9.0; 8]));
        assert_eq!(nodes[1].embedding.as_ref().map(Vec::len), Some(8));
        assert!(nodes[2].embedding.is_none());
    }
}
