use crate::embeddings::probe_dimension;
use crate::extractor::PageExtractor;
use crate::traits::{Embedder, VectorStore};
use crate::{ExtractionReport, IngestError, IngestionSummary, PageDocument, PagePayload};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Embeds, indexes and replaces one collection per ingested PDF.
pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    extractor: PageExtractor,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        extractor: PageExtractor,
    ) -> Self {
        Self {
            embedder,
            store,
            extractor,
        }
    }

    /// Probe, recreate, extract, embed, upload. No step is retried; re-running
    /// the whole call is safe because the collection is always recreated.
    pub async fn ingest(
        &self,
        document_path: &Path,
        collection: &str,
    ) -> Result<IngestionSummary, IngestError> {
        if collection.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "collection name is empty".to_string(),
            ));
        }

        let started = Instant::now();
        info!(path = %document_path.display(), collection, "ingesting pdf");

        let vector_dim = probe_dimension(self.embedder.as_ref()).await?;
        info!(vector_dim, "embedding vector dimension");

        self.store
            .ensure_fresh_collection(collection, vector_dim)
            .await?;

        let report = self.extractor.extract(document_path).await?;
        for skipped in &report.skipped {
            warn!(page = skipped.page_number, reason = %skipped.reason, "skipped page");
        }

        let summary = self.index_pages(collection, vector_dim, report).await?;
        info!(
            collection,
            pages = summary.pages_indexed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingestion complete"
        );

        Ok(summary)
    }

    async fn index_pages(
        &self,
        collection: &str,
        vector_dim: usize,
        report: ExtractionReport,
    ) -> Result<IngestionSummary, IngestError> {
        let (vectors, payloads) = self.embed_pages(&report.pages).await?;

        info!(collection, points = vectors.len(), "uploading vectors");
        self.store.upload(collection, vectors, payloads).await?;

        Ok(IngestionSummary {
            collection: collection.to_string(),
            vector_dim,
            pages_indexed: report.pages.len(),
            pages_skipped: report.skipped_count(),
            pages_empty: report.empty_pages,
        })
    }

    /// Vectors and payloads come back aligned with `pages`.
    async fn embed_pages(
        &self,
        pages: &[PageDocument],
    ) -> Result<(Vec<Vec<f32>>, Vec<PagePayload>), IngestError> {
        if pages.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let texts = pages
            .iter()
            .map(|page| page.content().to_string())
            .collect::<Vec<_>>();
        let vectors = self.embedder.embed_many(&texts).await?;

        if vectors.len() != pages.len() {
            return Err(IngestError::Embedding(crate::EmbeddingError::Malformed(
                format!("{} embeddings for {} pages", vectors.len(), pages.len()),
            )));
        }

        let payloads = pages.iter().map(PageDocument::to_payload).collect();
        Ok((vectors, payloads))
    }
}
