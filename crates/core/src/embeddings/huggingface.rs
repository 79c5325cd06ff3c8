use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

pub const HUGGINGFACE_INFERENCE_URL: &str = "https://api-inference.huggingface.co";
pub const HUGGINGFACE_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const HUGGINGFACE_EMBEDDING_DIMENSIONS: usize = 384;

#[derive(Debug, Clone)]
pub struct HuggingFaceConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
}

impl HuggingFaceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: HUGGINGFACE_INFERENCE_URL.to_string(),
            model: HUGGINGFACE_EMBEDDING_MODEL.to_string(),
            dimensions: HUGGINGFACE_EMBEDDING_DIMENSIONS,
        }
    }
}

pub struct HuggingFaceEmbedder {
    config: HuggingFaceConfig,
    client: Client,
}

impl HuggingFaceEmbedder {
    pub fn new(config: HuggingFaceConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn pipeline_url(&self) -> String {
        format!(
            "{}/pipeline/feature-extraction/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self
            .client
            .post(self.pipeline_url())
            .json(&json!({ "inputs": text }));

        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider(format!("{status}: {body}")));
        }

        let value: Value = response.json().await?;
        parse_feature_extraction(&value)
    }
}

/// Accepts `[f, ...]`, `[[f, ...]]` or a bare number.
fn parse_feature_extraction(value: &Value) -> Result<Vec<f32>, EmbeddingError> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .map(|number| vec![number as f32])
            .ok_or_else(|| EmbeddingError::InvalidResponse(value.to_string())),
        Value::Array(items) if items.iter().all(Value::is_number) => Ok(items
            .iter()
            .filter_map(Value::as_f64)
            .map(|number| number as f32)
            .collect()),
        Value::Array(items) if items.len() == 1 && items[0].is_array() => {
            parse_feature_extraction(&items[0])
        }
        _ => Err(EmbeddingError::InvalidResponse(
            "unexpected response format from Hugging Face API".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_vector_is_accepted() {
        let vector = parse_feature_extraction(&json!([0.1, 0.2, 0.3])).unwrap();
        assert_eq!(vector.len(), 3);
    }

    #[test]
    fn single_nested_vector_is_unwrapped() {
        let vector = parse_feature_extraction(&json!([[1.0, 2.0]])).unwrap();
        assert_eq!(vector, vec![1.0, 2.0]);
    }

    #[test]
    fn bare_number_becomes_one_dimension() {
        assert_eq!(parse_feature_extraction(&json!(0.5)).unwrap(), vec![0.5]);
    }

    #[test]
    fn token_matrix_is_rejected() {
        let result = parse_feature_extraction(&json!([[1.0], [2.0]]));
        assert!(matches!(result, Err(EmbeddingError::InvalidResponse(_))));
    }

    #[test]
    fn pipeline_url_includes_model() {
        let embedder = HuggingFaceEmbedder::new(HuggingFaceConfig::new(""));
        assert_eq!(
            embedder.pipeline_url(),
            "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2"
        );
    }
}
