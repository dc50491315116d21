use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("page {page} extraction failed: {details}")]
    Page { page: u32, details: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider returned {status}: {details}")]
    Provider { status: u16, details: String },

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("missing api key for embedding provider")]
    MissingApiKey,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{vectors} vectors but {payloads} payloads")]
    LengthMismatch { vectors: usize, payloads: usize },

    #[error("upload incomplete: {failed} of {total} batches failed ({first_error})")]
    PartialUpload {
        failed: usize,
        total: usize,
        first_error: String,
    },

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat provider returned {status}: {details}")]
    Provider { status: u16, details: String },

    #[error("chat response had no content")]
    EmptyResponse,

    #[error("missing api key for chat provider")]
    MissingApiKey,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("document not indexed: collection '{0}' does not exist, run ingestion first")]
    NotIndexed(String),

    #[error("question is empty")]
    EmptyQuestion,

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store failed: {0}")]
    Store(StoreError),

    #[error("chat completion failed: {0}")]
    Chat(#[from] ChatError),
}

impl From<StoreError> for QueryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CollectionNotFound(name) => QueryError::NotIndexed(name),
            other => QueryError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no document uploaded")]
    NoDocument,

    #[error("document '{0}' has not been indexed yet")]
    NotIngested(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
