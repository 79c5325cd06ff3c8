use crate::models::{ChunkPayload, IndexPoint, PayloadFilter, ScoredPoint};
use crate::store::rank_points;
use crate::traits::VectorIndex;
use crate::IndexError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API.
pub struct QdrantStore {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, IndexError> {
        let parsed = Url::parse(endpoint)?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client: Client::new(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.endpoint, collection)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, IndexError> {
        let response = self
            .authorized(self.client.get(self.collection_url(name)))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(backend_error(status, response.text().await.unwrap_or_default())),
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        if self.collection_exists(name).await? {
            debug!(collection = name, "collection already exists");
            return Ok(());
        }

        let response = self
            .authorized(self.client.put(self.collection_url(name)))
            .json(&json!({
                "vectors": {
                    "size": dimension,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(collection = name, dimension, "collection created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_already_exists(status, &body) {
            debug!(collection = name, "collection created concurrently");
            return Ok(());
        }

        Err(backend_error(status, body))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
        let response = self
            .authorized(self.client.delete(self.collection_url(name)))
            .send()
            .await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            let status = response.status();
            return Err(backend_error(status, response.text().await.unwrap_or_default()));
        }

        Ok(())
    }

    async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<(), IndexError> {
        if points.is_empty() {
            return Ok(());
        }

        let points = points
            .iter()
            .map(|point| {
                Ok(json!({
                    "id": point.id.to_string(),
                    "vector": point.vector,
                    "payload": serde_json::to_value(&point.payload)?,
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let response = self
            .authorized(
                self.client
                    .put(format!("{}/points?wait=true", self.collection_url(collection))),
            )
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(backend_error(status, response.text().await.unwrap_or_default()));
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
        let mut body = json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter_body(filter);
        }

        let response = self
            .authorized(
                self.client
                    .post(format!("{}/points/search", self.collection_url(collection))),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(backend_error(status, response.text().await.unwrap_or_default()));
        }

        let parsed: Value = response.json().await?;
        let mut points = parse_search_response(&parsed)?;
        rank_points(&mut points);
        points.truncate(limit);
        Ok(points)
    }

    async fn delete_points(
        &self,
        collection: &str,
        filter: &PayloadFilter,
    ) -> Result<(), IndexError> {
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/points/delete?wait=true", self.collection_url(collection))),
            )
            .json(&json!({ "filter": filter_body(filter) }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(backend_error(status, response.text().await.unwrap_or_default()));
        }

        Ok(())
    }
}

fn backend_error(status: StatusCode, body: String) -> IndexError {
    IndexError::BackendResponse {
        backend: BACKEND.to_string(),
        details: if body.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {body}")
        },
    }
}

/// A concurrent create of the same collection loses with 409, or 400 on older servers.
fn is_already_exists(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && body.contains("already exists"))
}

fn filter_body(filter: &PayloadFilter) -> Value {
    json!({
        "must": [
            {
                "key": filter.key,
                "match": { "value": filter.value },
            }
        ]
    })
}

fn parse_search_response(parsed: &Value) -> Result<Vec<ScoredPoint>, IndexError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "search response has no result array".to_string(),
        })?;

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = match hit.pointer("/id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => String::new(),
        };
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        let payload: ChunkPayload =
            serde_json::from_value(hit.pointer("/payload").cloned().unwrap_or(Value::Null))?;

        result.push(ScoredPoint { id, score, payload });
    }

    Ok(result)
}
