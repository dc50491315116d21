use crate::traits::VectorStore;
use crate::{CollectionInfo, PagePayload, ScoredPage, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

struct MemoryCollection {
    vector_dim: usize,
    points: Vec<(Vec<f32>, PagePayload)>,
}

/// Process-local collections with the same lifecycle rules as Qdrant.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, name: &str) -> Option<usize> {
        self.collections
            .read()
            .ok()
            .and_then(|collections| collections.get(name).map(|collection| collection.points.len()))
    }
}

fn poisoned() -> StoreError {
    StoreError::Request("in-memory store lock poisoned".to_string())
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.contains_key(name))
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

        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections.insert(
            name.to_string(),
            MemoryCollection {
                vector_dim,
                points: Vec::new(),
            },
        );
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

        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        if let Some(bad) = vectors
            .iter()
            .find(|vector| vector.len() != collection.vector_dim)
        {
            return Err(StoreError::DimensionMismatch {
                expected: collection.vector_dim,
                actual: bad.len(),
            });
        }

        collection.points.extend(vectors.into_iter().zip(payloads));
        Ok(())
    }

    async fn similarity_search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPage>, StoreError> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        if query.len() != collection.vector_dim {
            return Err(StoreError::DimensionMismatch {
                expected: collection.vector_dim,
                actual: query.len(),
            });
        }

        let mut scored = collection
            .points
            .iter()
            .map(|(vector, payload)| ScoredPage {
                payload: payload.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect::<Vec<_>>();

        // stable sort keeps insertion order among equal scores
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);

        Ok(scored)
    }

    async fn load_existing(&self, name: &str) -> Result<CollectionInfo, StoreError> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        Ok(CollectionInfo {
            name: name.to_string(),
            vector_dim: Some(collection.vector_dim),
            points_count: collection.points.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(page: u32) -> PagePayload {
        PagePayload {
            source: "a.pdf".to_string(),
            page,
            text: format!("page {page}"),
            page_content: format!("page {page}"),
        }
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_caps_at_k() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        store.ensure_fresh_collection("docs", 2).await?;
        store
            .upload(
                "docs",
                vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.7, 0.7]],
                vec![payload(1), payload(2), payload(3)],
            )
            .await?;

        let hits = store.similarity_search("docs", &[1.0, 0.0], 2).await?;

        assert_eq!(
            hits.iter().map(|hit| hit.payload.page).collect::<Vec<_>>(),
            vec![2, 3]
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_collection_searches_to_nothing() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        store.ensure_fresh_collection("docs", 3).await?;
        store.upload("docs", Vec::new(), Vec::new()).await?;

        assert!(store.similarity_search("docs", &[1.0, 0.0, 0.0], 4).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn recreate_discards_previous_points() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        store.ensure_fresh_collection("docs", 2).await?;
        store
            .upload("docs", vec![vec![1.0, 0.0]], vec![payload(1)])
            .await?;
        store.ensure_fresh_collection("docs", 2).await?;

        assert_eq!(store.load_existing("docs").await?.points_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_dimension_uploads_nothing() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        store.ensure_fresh_collection("docs", 3).await?;
        let result = store
            .upload(
                "docs",
                vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0]],
                vec![payload(1), payload(2)],
            )
            .await;

        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert_eq!(store.point_count("docs"), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_collection_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.load_existing("ghost").await,
            Err(StoreError::CollectionNotFound(_))
        ));
        assert!(!store.collection_exists("ghost").await.unwrap_or(true));
    }
}
