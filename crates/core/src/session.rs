use crate::ingest::Ingestor;
use crate::orchestrator::QueryEngine;
use crate::{IngestionSummary, SessionError};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

struct UploadedDocument {
    file_name: String,
    file: NamedTempFile,
    uploaded_at: DateTime<Utc>,
}

/// State for one interactive user: the uploaded document and whether it has
/// been indexed. Lifecycle is upload, mark ingested, reset.
#[derive(Default)]
pub struct Session {
    document: Option<UploadedDocument>,
    ingested: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` in a temp file. A different file name replaces the
    /// current document and clears the ingested flag; the same name is a no-op.
    /// Returns whether the document changed.
    pub fn accept_upload(&mut self, file_name: &str, bytes: &[u8]) -> Result<bool, SessionError> {
        if self.file_name() == Some(file_name) {
            return Ok(false);
        }

        let mut file = tempfile::Builder::new()
            .prefix("askpdf-")
            .suffix(".pdf")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        self.document = Some(UploadedDocument {
            file_name: file_name.to_string(),
            file,
            uploaded_at: Utc::now(),
        });
        self.ingested = false;
        Ok(true)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.document.as_ref().map(|doc| doc.file_name.as_str())
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.document.as_ref().map(|doc| doc.file.path())
    }

    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        self.document.as_ref().map(|doc| doc.uploaded_at)
    }

    pub fn is_ingested(&self) -> bool {
        self.ingested
    }

    pub fn needs_ingestion(&self) -> bool {
        self.document.is_some() && !self.ingested
    }

    pub fn mark_ingested(&mut self) {
        if self.document.is_some() {
            self.ingested = true;
        }
    }

    /// Deletes the temp file and forgets everything.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.ingested = false;
        if let Some(document) = self.document.take() {
            document.file.close()?;
        }
        Ok(())
    }
}

/// Ingestion and querying bound to one collection name.
pub struct Pipeline {
    ingestor: Ingestor,
    engine: QueryEngine,
    collection: String,
}

impl Pipeline {
    pub fn new(ingestor: Ingestor, engine: QueryEngine, collection: impl Into<String>) -> Self {
        Self {
            ingestor,
            engine,
            collection: collection.into(),
        }
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Indexes the session document if it is not indexed yet.
    pub async fn ingest_session(
        &self,
        session: &mut Session,
    ) -> Result<Option<IngestionSummary>, SessionError> {
        if !session.needs_ingestion() {
            return Ok(None);
        }

        let path = session.document_path().ok_or(SessionError::NoDocument)?;
        let summary = self.ingestor.ingest(path, &self.collection).await?;
        session.mark_ingested();
        info!(
            collection = %self.collection,
            pages = summary.pages_indexed,
            "session document indexed"
        );

        Ok(Some(summary))
    }

    pub async fn ask(&self, session: &Session, question: &str) -> Result<String, SessionError> {
        let file_name = session.file_name().ok_or(SessionError::NoDocument)?;
        if !session.is_ingested() {
            return Err(SessionError::NotIngested(file_name.to_string()));
        }

        Ok(self.engine.answer(question, &self.collection).await?)
    }
}
