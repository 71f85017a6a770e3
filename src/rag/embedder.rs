//! Embedder collaborator trait
//!
//! The embedding computation itself lives outside this crate. Embedding is
//! idempotent and side-effect-free; the embedder's load/unload lifecycle is
//! independent of the generation backend's.

use async_trait::async_trait;

use crate::error::AssistantError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimensionality of produced vectors.
    fn dimension(&self) -> usize;

    /// Load the embedding model if it is not resident yet. Idempotent.
    async fn ensure_loaded(&self) -> Result<(), AssistantError>;

    async fn unload(&self);

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AssistantError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AssistantError>;
}
