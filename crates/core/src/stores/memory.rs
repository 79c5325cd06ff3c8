use crate::models::{ChunkPayload, IndexPoint, PayloadFilter, ScoredPoint};
use crate::store::{cosine_similarity, rank_points};
use crate::traits::VectorIndex;
use crate::IndexError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

struct StoredPoint {
    vector: Vec<f32>,
    payload: ChunkPayload,
    fields: Map<String, Value>,
}

impl StoredPoint {
    fn matches(&self, filter: &PayloadFilter) -> bool {
        self.fields.get(&filter.key).and_then(Value::as_str) == Some(filter.value.as_str())
    }
}

struct Collection {
    dimension: usize,
    points: BTreeMap<Uuid, StoredPoint>,
}

/// Process-local vector index with exhaustive cosine search.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |collection| collection.points.len())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorStore {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                dimension,
                points: BTreeMap::new(),
            });
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<(), IndexError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| IndexError::MissingCollection(collection.to_string()))?;

        if let Some(point) = points
            .iter()
            .find(|point| point.vector.len() != target.dimension)
        {
            return Err(IndexError::DimensionMismatch {
                expected: target.dimension,
                actual: point.vector.len(),
            });
        }

        for point in points {
            let fields = match serde_json::to_value(&point.payload)? {
                Value::Object(fields) => fields,
                _ => Map::new(),
            };
            target.points.insert(
                point.id,
                StoredPoint {
                    vector: point.vector.clone(),
                    payload: point.payload.clone(),
                    fields,
                },
            );
        }

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| IndexError::MissingCollection(collection.to_string()))?;

        if query_vector.len() != target.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: target.dimension,
                actual: query_vector.len(),
            });
        }

        let mut hits: Vec<ScoredPoint> = target
            .points
            .iter()
            .filter(|(_, point)| filter.map_or(true, |filter| point.matches(filter)))
            .map(|(id, point)| ScoredPoint {
                id: id.to_string(),
                score: cosine_similarity(query_vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();

        rank_points(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_points(
        &self,
        collection: &str,
        filter: &PayloadFilter,
    ) -> Result<(), IndexError> {
        if let Some(target) = self.collections.write().await.get_mut(collection) {
            target.points.retain(|_, point| !point.matches(filter));
        }
        Ok(())
    }
}
