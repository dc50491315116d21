use crate::config::{non_empty, OpenAiConfig};
use crate::error::EmbeddingError;
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Probe string whose embedding length defines the collection dimensionality.
pub const PROBE_TEXT: &str = "test";

const DEFAULT: usize = 128;

pub const DEFAULT_HASHING_DIMENSIONS: usize = DEFAULT;

/// Embeds `PROBE_TEXT` and returns the vector length.
pub async fn probe_dimension<E>(embedder: &E) -> Result<usize, EmbeddingError>
where
    E: Embedder + ?Sized,
{
    let vector = embedder.embed_one(PROBE_TEXT).await?;
    if vector.is_empty() {
        return Err(EmbeddingError::Malformed(
            "probe embedding has zero length".to_string(),
        ));
    }
    Ok(vector.len())
}

/// Deterministic character-trigram embedder for offline use.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = format!(" {} ", text.to_lowercase());
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    batch_size: usize,
    max_input_chars: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &OpenAiConfig) -> Result<Self, EmbeddingError> {
        let api_key = non_empty(config.api_key.clone()).ok_or(EmbeddingError::MissingApiKey)?;

        Ok(Self {
            client: Client::new(),
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.embedding_model.clone(),
            batch_size: config.embed_batch_size.max(1),
            max_input_chars: config.max_input_chars.max(1),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        debug!(model = %self.model, inputs = batch.len(), "embedding request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: batch,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                details,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::Malformed(error.to_string()))?;

        order_rows(parsed.data, batch.len())
    }
}

/// Places rows at their `index`, rejecting gaps, duplicates and empty vectors.
fn order_rows(rows: Vec<EmbeddingRow>, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if rows.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {expected} embeddings, got {}",
            rows.len()
        )));
    }

    let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
    for row in rows {
        if row.embedding.is_empty() {
            return Err(EmbeddingError::Malformed(format!(
                "embedding at index {} is empty",
                row.index
            )));
        }

        let slot = ordered.get_mut(row.index).ok_or_else(|| {
            EmbeddingError::Malformed(format!("embedding index {} out of range", row.index))
        })?;
        if slot.is_some() {
            return Err(EmbeddingError::Malformed(format!(
                "duplicate embedding index {}",
                row.index
            )));
        }
        *slot = Some(row.embedding);
    }

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| EmbeddingError::Malformed(format!("missing embedding {index}")))
        })
        .collect()
}

/// Cuts `text` into pieces of at most `max_chars` characters.
fn split_for_context(text: &str, max_chars: usize) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    if chars.len() <= max_chars {
        return vec![text.to_string()];
    }
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Length-weighted mean of piece embeddings, scaled to unit length.
/// A single piece is returned unchanged.
fn average_pieces(mut pieces: Vec<(Vec<f32>, usize)>) -> Result<Vec<f32>, EmbeddingError> {
    if pieces.len() == 1 {
        if let Some((vector, _)) = pieces.pop() {
            return Ok(vector);
        }
    }

    let dimensions = pieces
        .first()
        .map(|(vector, _)| vector.len())
        .ok_or_else(|| EmbeddingError::Malformed("no embedding for input".to_string()))?;
    let mut mean = vec![0f32; dimensions];
    let mut total = 0f32;

    for (vector, weight) in &pieces {
        if vector.len() != dimensions {
            return Err(EmbeddingError::Malformed(format!(
                "piece embeddings differ in length: {} vs {dimensions}",
                vector.len()
            )));
        }
        let weight = (*weight).max(1) as f32;
        total += weight;
        for (slot, value) in mean.iter_mut().zip(vector) {
            *slot += value * weight;
        }
    }

    for value in &mut mean {
        *value /= total;
    }
    let magnitude = mean.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in &mut mean {
            *value /= magnitude;
        }
    }

    Ok(mean)
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("empty embedding response".to_string()))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut pieces = Vec::with_capacity(texts.len());
        let mut owners = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            for piece in split_for_context(text, self.max_input_chars) {
                owners.push((index, piece.chars().count()));
                pieces.push(piece);
            }
        }
        if pieces.len() > texts.len() {
            debug!(
                inputs = texts.len(),
                pieces = pieces.len(),
                "splitting over-long embedding inputs"
            );
        }

        let mut vectors = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }

        let mut grouped: Vec<Vec<(Vec<f32>, usize)>> = vec![Vec::new(); texts.len()];
        for ((index, weight), vector) in owners.into_iter().zip(vectors) {
            if let Some(group) = grouped.get_mut(index) {
                group.push((vector, weight));
            }
        }

        grouped.into_iter().map(average_pieces).collect()
    }
}
