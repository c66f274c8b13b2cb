//! Embedder trait for name embeddings.
//!
//! Identity resolution compares chemical names in an embedding space.
//! Implementations wrap an embedding provider; the engine only needs the
//! one operation. Inputs are canonicalized (trimmed, lower-cased) by the
//! callers so that "DMSO" and "dmso " embed identically.

use async_trait::async_trait;

use crate::error::Result;

/// Produces embedding vectors for chemical names.
///
/// Implementations must return vectors of a fixed dimension matching the
/// resolver configuration.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one canonicalized name.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of names. The default loops over `embed`; providers
    /// with a batch endpoint should override.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
