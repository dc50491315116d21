use crate::traits::{ChatModel, Embedder, VectorStore};
use crate::{QueryError, ScoredPage};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Returned instead of calling the chat model when retrieval finds nothing.
pub const NO_RELEVANT_CONTENT: &str = "No relevant content found in the document.";

const SYSTEM_PREAMBLE: &str = "You are a helpful assistant that answers user questions based on the following extracted PDF content.\n\nOnly use the context provided. Reference page numbers when helpful. Do not guess or fabricate facts.";

/// Joins hits in rank order into the context block shown to the model.
pub fn build_context(hits: &[ScoredPage]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "Page Number: {}\nSource: {}\nContent:\n{}",
                hit.payload.page, hit.payload.source, hit.payload.page_content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn system_prompt(context: &str) -> String {
    format!("{SYSTEM_PREAMBLE}\n\nContext:\n{context}")
        .trim()
        .to_string()
}

pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            chat,
            top_k: top_k.max(1),
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        collection: &str,
    ) -> Result<Vec<ScoredPage>, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let started = Instant::now();
        let info = self.store.load_existing(collection).await?;
        info!(collection, points = info.points_count, "loaded collection");

        let embedding = self.embedder.embed_one(question).await?;
        let hits = self
            .store
            .similarity_search(collection, &embedding, self.top_k)
            .await?;
        info!(
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieved relevant pages"
        );

        Ok(hits)
    }

    pub async fn answer(&self, question: &str, collection: &str) -> Result<String, QueryError> {
        let hits = self.retrieve(question, collection).await?;
        if hits.is_empty() {
            return Ok(NO_RELEVANT_CONTENT.to_string());
        }

        let started = Instant::now();
        let system = system_prompt(&build_context(&hits));
        let response = self.chat.complete(&system, question).await?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat response generated"
        );

        Ok(response.trim().to_string())
    }
}
