use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_COLLECTION: &str = "session_collection";
pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 64;
pub const DEFAULT_UPLOAD_PARALLEL: usize = 4;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;
/// Roughly the 8191-token embedding context at three characters per token.
pub const DEFAULT_EMBED_MAX_INPUT_CHARS: usize = 24_000;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub embed_batch_size: usize,
    /// Inputs longer than this are embedded in pieces and averaged.
    pub max_input_chars: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            max_input_chars: DEFAULT_EMBED_MAX_INPUT_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub batch_size: usize,
    pub parallel: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_QDRANT_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_STORE_TIMEOUT,
            batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            parallel: DEFAULT_UPLOAD_PARALLEL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub collection: String,
    pub top_k: usize,
    /// Upper bound on concurrently extracted pages.
    pub extract_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            top_k: DEFAULT_TOP_K,
            extract_workers: default_workers(),
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
}

/// Treats blank strings as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_are_treated_as_missing() {
        assert_eq!(non_empty(Some("   ".to_string())), None);
        assert_eq!(non_empty(Some(" sk-1 ".to_string())), Some("sk-1".to_string()));
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn defaults_match_provider_limits() {
        let qdrant = QdrantConfig::default();
        assert_eq!(qdrant.batch_size, 64);
        assert_eq!(qdrant.parallel, 4);
        assert_eq!(qdrant.timeout, Duration::from_secs(40));
        assert!(PipelineConfig::default().extract_workers >= 1);
    }
}
