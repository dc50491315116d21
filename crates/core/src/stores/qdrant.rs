use crate::config::{non_empty, QdrantConfig};
use crate::traits::VectorStore;
use crate::{CollectionInfo, PagePayload, ScoredPage, StoreError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
    batch_size: usize,
    parallel: usize,
}

impl QdrantStore {
    pub fn new(config: &QdrantConfig) -> Result<Self, StoreError> {
        let endpoint = Url::parse(&config.url)?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            api_key: non_empty(config.api_key.clone()),
            client,
            batch_size: config.batch_size.max(1),
            parallel: config.parallel.max(1),
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.endpoint, name)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        with_api_key(request, self.api_key.as_deref())
    }
}

fn with_api_key(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => request.header("api-key", key),
        None => request,
    }
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

async fn upload_batch(
    client: Client,
    url: String,
    api_key: Option<String>,
    points: Vec<Value>,
) -> Result<(), StoreError> {
    let request = client.put(url).json(&json!({ "points": points }));
    let response = with_api_key(request, api_key.as_deref()).send().await?;
    ensure_success(response).await?;
    Ok(())
}

fn parse_collection_info(name: &str, body: &Value) -> CollectionInfo {
    let vector_dim = body
        .pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|size| size as usize);
    let points_count = body
        .pointer("/result/points_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    CollectionInfo {
        name: name.to_string(),
        vector_dim,
        points_count,
    }
}

fn parse_hits(body: &Value) -> Result<Vec<ScoredPage>, StoreError> {
    let hits = body
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "search response has no result array".to_string(),
        })?;

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<PagePayload>(payload) {
            Ok(payload) => result.push(ScoredPage { payload, score }),
            Err(error) => warn!(error = %error, "skipping hit with foreign payload"),
        }
    }

    Ok(result)
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .authorize(self.client.get(format!("{}/collections", self.endpoint)))
            .send()
            .await?;
        let body: Value = ensure_success(response).await?.json().await?;

        let exists = body
            .pointer("/result/collections")
            .and_then(Value::as_array)
            .map(|collections| {
                collections
                    .iter()
                    .any(|item| item.pointer("/name").and_then(Value::as_str) == Some(name))
            })
            .unwrap_or(false);

        Ok(exists)
    }

    async fn ensure_fresh_collection(
        &self,
        name: &str,
        vector_dim: usize,
    ) -> Result<(), StoreError> {
        if vector_dim == 0 {
            return Err(StoreError::Request(
                "collection dimension must be positive".to_string(),
            ));
        }

        if self.collection_exists(name).await? {
            info!(collection = name, "deleting existing collection");
            let response = self
                .authorize(self.client.delete(self.collection_url(name)))
                .send()
                .await?;
            ensure_success(response).await?;
        }

        info!(collection = name, vector_dim, "creating collection");
        let response = self
            .authorize(self.client.put(self.collection_url(name)))
            .json(&json!({
                "vectors": { "size": vector_dim, "distance": "Cosine" }
            }))
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(())
    }

    async fn upload(
        &self,
        name: &str,
        vectors: Vec<Vec<f32>>,
        payloads: Vec<PagePayload>,
    ) -> Result<(), StoreError> {
        if vectors.len() != payloads.len() {
            return Err(StoreError::LengthMismatch {
                vectors: vectors.len(),
                payloads: payloads.len(),
            });
        }

        let info = self.load_existing(name).await?;
        if let Some(expected) = info.vector_dim {
            if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        if vectors.is_empty() {
            return Ok(());
        }

        let points = vectors
            .into_iter()
            .zip(payloads)
            .map(|(vector, payload)| {
                let payload = serde_json::to_value(payload)?;
                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let url = format!("{}/points?wait=true", self.collection_url(name));
        let mut batches = points
            .chunks(self.batch_size)
            .map(<[Value]>::to_vec)
            .collect::<Vec<_>>()
            .into_iter();
        let total = batches.len();
        let mut tasks = JoinSet::new();
        let mut failed = 0usize;
        let mut first_error = None;

        let spawn = |tasks: &mut JoinSet<Result<(), StoreError>>, batch: Vec<Value>| {
            tasks.spawn(upload_batch(
                self.client.clone(),
                url.clone(),
                self.api_key.clone(),
                batch,
            ));
        };

        for batch in batches.by_ref().take(self.parallel) {
            spawn(&mut tasks, batch);
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome =
                joined.unwrap_or_else(|error| Err(StoreError::Request(error.to_string())));
            if let Err(error) = outcome {
                warn!(collection = name, error = %error, "upload batch failed");
                failed += 1;
                first_error.get_or_insert_with(|| error.to_string());
            }

            if let Some(batch) = batches.next() {
                spawn(&mut tasks, batch);
            }
        }

        if failed > 0 {
            return Err(StoreError::PartialUpload {
                failed,
                total,
                first_error: first_error.unwrap_or_default(),
            });
        }

        debug!(collection = name, batches = total, "upload complete");
        Ok(())
    }

    async fn similarity_search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPage>, StoreError> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/points/search", self.collection_url(name))),
            )
            .json(&json!({
                "vector": query,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        let body: Value = ensure_success(response).await?.json().await?;
        parse_hits(&body)
    }

    async fn load_existing(&self, name: &str) -> Result<CollectionInfo, StoreError> {
        let response = self
            .authorize(self.client.get(self.collection_url(name)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        let body: Value = ensure_success(response).await?.json().await?;
        Ok(parse_collection_info(name, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const UPLOAD_LATENCY: Duration = Duration::from_millis(250);

    /// Answers point uploads after a fixed latency and logs when each arrived.
    #[derive(Clone, Default)]
    struct SlowUploads {
        arrivals: Arc<Mutex<Vec<Instant>>>,
    }

    impl Respond for SlowUploads {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            if let Ok(mut arrivals) = self.arrivals.lock() {
                arrivals.push(Instant::now());
            }
            ResponseTemplate::new(200)
                .set_body_json(json!({ "result": { "status": "completed" } }))
                .set_delay(UPLOAD_LATENCY)
        }
    }

    /// Largest number of requests whose latency windows overlap.
    fn peak_in_flight(arrivals: &[Instant]) -> usize {
        arrivals
            .iter()
            .map(|start| {
                arrivals
                    .iter()
                    .filter(|other| {
                        **other >= *start && other.duration_since(*start) < UPLOAD_LATENCY
                    })
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    fn store_for(server: &MockServer, batch_size: usize) -> Result<QdrantStore, StoreError> {
        QdrantStore::new(&QdrantConfig {
            url: server.uri(),
            api_key: Some("secret".to_string()),
            timeout: Duration::from_secs(5),
            batch_size,
            parallel: 2,
        })
    }

    fn payload(page: u32) -> PagePayload {
        PagePayload {
            source: "/tmp/a.pdf".to_string(),
            page,
            text: format!("page {page}"),
            page_content: format!("page {page}"),
        }
    }

    async fn mount_collection_info(server: &MockServer, size: usize) {
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "status": "green",
                    "points_count": 0,
                    "config": { "params": { "vectors": { "size": size, "distance": "Cosine" } } }
                },
                "status": "ok"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn existing_collection_is_deleted_before_create(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections"))
            .and(header("api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "collections": [{ "name": "docs" }] },
                "status": "ok"
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs"))
            .and(body_partial_json(json!({
                "vectors": { "size": 3072, "distance": "Cosine" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server, 64)?
            .ensure_fresh_collection("docs", 3072)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_collection_is_created_without_delete(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "collections": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server, 64)?.ensure_fresh_collection("docs", 8).await?;
        Ok(())
    }

    #[tokio::test]
    async fn upload_splits_into_batches() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_collection_info(&server, 2).await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .and(query_param("wait", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "status": "completed" }
            })))
            .expect(3)
            .mount(&server)
            .await;

        let vectors = vec![vec![1.0, 0.0]; 5];
        let payloads = (1..=5).map(payload).collect();
        store_for(&server, 2)?.upload("docs", vectors, payloads).await?;
        Ok(())
    }

    #[tokio::test]
    async fn upload_keeps_at_most_parallel_batches_in_flight(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_collection_info(&server, 2).await;
        let uploads = SlowUploads::default();
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .respond_with(uploads.clone())
            .expect(6)
            .mount(&server)
            .await;

        let vectors = vec![vec![1.0, 0.0]; 6];
        let payloads = (1..=6).map(payload).collect();
        store_for(&server, 1)?.upload("docs", vectors, payloads).await?;

        let arrivals = uploads.arrivals.lock().map_err(|e| e.to_string())?;
        assert_eq!(arrivals.len(), 6);
        let peak = peak_in_flight(&arrivals);
        assert!((1..=2).contains(&peak), "peak in-flight uploads was {peak}");
        Ok(())
    }

    #[tokio::test]
    async fn failed_batch_surfaces_partial_upload() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_collection_info(&server, 2).await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": {} })))
            .mount(&server)
            .await;

        let vectors = vec![vec![1.0, 0.0]; 4];
        let payloads = (1..=4).map(payload).collect();
        let result = store_for(&server, 1)?.upload("docs", vectors, payloads).await;

        assert!(matches!(
            result,
            Err(StoreError::PartialUpload { failed: 1, total: 4, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_dimension_fails_before_any_point_is_sent(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_collection_info(&server, 3072).await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let vectors = vec![vec![0.1; 3072], vec![0.1; 1536]];
        let payloads = vec![payload(1), payload(2)];
        let result = store_for(&server, 64)?.upload("docs", vectors, payloads).await;

        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch {
                expected: 3072,
                actual: 1536
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn misaligned_input_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        let result = store_for(&server, 64)?
            .upload("docs", vec![vec![1.0]], Vec::new())
            .await;

        assert!(matches!(
            result,
            Err(StoreError::LengthMismatch {
                vectors: 1,
                payloads: 0
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn search_parses_payloads_in_rank_order() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/search"))
            .and(body_partial_json(json!({ "limit": 2, "with_payload": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    { "id": "a", "score": 0.91, "payload": {
                        "source": "/tmp/a.pdf", "page": 3,
                        "text": "invoice", "page_content": "invoice" } },
                    { "id": "b", "score": 0.42, "payload": {
                        "source": "/tmp/a.pdf", "page": 1,
                        "text": "intro", "page_content": "intro" } }
                ]
            })))
            .mount(&server)
            .await;

        let hits = store_for(&server, 64)?
            .similarity_search("docs", &[1.0, 0.0], 2)
            .await?;

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.page, 3);
        assert!(hits[0].score > hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_collection_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "status": { "error": "Not found: Collection `ghost` doesn't exist!" }
            })))
            .mount(&server)
            .await;

        let result = store_for(&server, 64)?.load_existing("ghost").await;

        assert!(matches!(result, Err(StoreError::CollectionNotFound(ref name)) if name == "ghost"));
        Ok(())
    }
}
