use crate::{ChatError, CollectionInfo, EmbeddingError, PagePayload, ScoredPage, StoreError};
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Output is positionally aligned with `texts`.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Drops `name` if it exists, then creates it empty with cosine distance.
    async fn ensure_fresh_collection(
        &self,
        name: &str,
        vector_dim: usize,
    ) -> Result<(), StoreError>;

    async fn upload(
        &self,
        name: &str,
        vectors: Vec<Vec<f32>>,
        payloads: Vec<PagePayload>,
    ) -> Result<(), StoreError>;

    async fn similarity_search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPage>, StoreError>;

    async fn load_existing(&self, name: &str) -> Result<CollectionInfo, StoreError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ChatError>;
}
