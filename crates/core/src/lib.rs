pub mod chat;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod stores;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use chat::{ExtractiveChat, OpenAiChat};
pub use config::{OpenAiConfig, PipelineConfig, QdrantConfig};
pub use embeddings::{
    probe_dimension, HashingEmbedder, OpenAiEmbedder, DEFAULT_HASHING_DIMENSIONS, PROBE_TEXT,
};
pub use error::{ChatError, EmbeddingError, IngestError, QueryError, SessionError, StoreError};
pub use extractor::{
    combine_page, detect_tables, render_table, LopdfSource, PageExtractor, PageSource, RawPage,
};
pub use ingest::Ingestor;
pub use models::{
    CollectionInfo, ExtractionReport, IngestionSummary, PageDocument, PagePayload, ScoredPage,
    SkippedPage, Table,
};
pub use orchestrator::{build_context, system_prompt, QueryEngine, NO_RELEVANT_CONTENT};
pub use session::{Pipeline, Session};
pub use stores::{InMemoryStore, QdrantStore};
pub use traits::{ChatModel, Embedder, VectorStore};
