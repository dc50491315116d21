use serde::{Deserialize, Serialize};

/// Rows of optional cells, as produced by table detection.
pub type Table = Vec<Vec<Option<String>>>;

/// One non-empty page of the ingested PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDocument {
    content: String,
    source: String,
    page_number: u32,
}

impl PageDocument {
    /// Returns `None` for empty content or a zero page number.
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        page_number: u32,
    ) -> Option<Self> {
        let content = content.into();
        if content.trim().is_empty() || page_number == 0 {
            return None;
        }

        Some(Self {
            content,
            source: source.into(),
            page_number,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn to_payload(&self) -> PagePayload {
        PagePayload {
            source: self.source.clone(),
            page: self.page_number,
            text: self.content.clone(),
            page_content: self.content.clone(),
        }
    }
}

/// Point payload stored next to each vector. Content is duplicated under
/// `text` and `page_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePayload {
    pub source: String,
    pub page: u32,
    pub text: String,
    pub page_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPage {
    pub payload: PagePayload,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vector_dim: Option<usize>,
    pub points_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPage {
    pub page_number: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub pages: Vec<PageDocument>,
    pub skipped: Vec<SkippedPage>,
    pub empty_pages: usize,
}

impl ExtractionReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub collection: String,
    pub vector_dim: usize,
    pub pages_indexed: usize,
    pub pages_skipped: usize,
    pub pages_empty: usize,
}
