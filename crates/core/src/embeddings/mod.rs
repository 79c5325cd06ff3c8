pub mod huggingface;
pub mod openai;

pub use huggingface::{HuggingFaceConfig, HuggingFaceEmbedder};
pub use openai::{OpenAiEmbedder, OpenAiEmbeddingConfig};

use crate::error::EmbeddingError;
use crate::retry::{RetryPolicy, RetryStep, Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

const WARM_UP_TEXT: &str = "Warm up text";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Fails with [`EmbeddingError::RateLimited`] when the provider throttles;
    /// every other failure is final.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        self.embed(WARM_UP_TEXT).await.map(|_| ())
    }
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }

    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        (**self).warm_up().await
    }
}

/// Retries rate-limited calls of the wrapped provider with exponential backoff.
///
/// Each call owns its own [`crate::retry::Backoff`], so one text waiting out
/// a delay never holds up embeddings of other texts.
pub struct RetryingEmbedder<P, S = TokioSleeper> {
    inner: P,
    policy: RetryPolicy,
    sleeper: S,
}

impl<P: EmbeddingProvider> RetryingEmbedder<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            sleeper: TokioSleeper,
        }
    }
}

impl<P: EmbeddingProvider, S: Sleeper> RetryingEmbedder<P, S> {
    pub fn with_sleeper(inner: P, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            inner,
            policy,
            sleeper,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: EmbeddingProvider, S: Sleeper> EmbeddingProvider for RetryingEmbedder<P, S> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut backoff = self.policy.start();

        loop {
            match self.inner.embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(EmbeddingError::RateLimited) => match backoff.record_failure() {
                    RetryStep::Retry { attempt, delay } => {
                        warn!(
                            model = self.inner.model_name(),
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "embedding rate limited, backing off"
                        );
                        self.sleeper.sleep(delay).await;
                    }
                    RetryStep::Exhausted { attempts } => {
                        warn!(
                            model = self.inner.model_name(),
                            attempts,
                            "embedding retries exhausted"
                        );
                        return Err(EmbeddingError::Exhausted { attempts });
                    }
                },
                Err(error) => {
                    debug!(
                        model = self.inner.model_name(),
                        %error,
                        "embedding failed without retry"
                    );
                    return Err(error);
                }
            }
        }
    }
}

/// Deterministic, offline embedder hashing character trigrams into buckets.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
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
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn model_name(&self) -> &str {
        "char-trigram"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

/// Embedding backend chosen once at startup.
pub enum EmbeddingBackend {
    OpenAi(OpenAiEmbedder),
    HuggingFace(HuggingFaceEmbedder),
    Local(CharacterNgramEmbedder),
}

#[async_trait]
impl EmbeddingProvider for EmbeddingBackend {
    fn dimensions(&self) -> usize {
        match self {
            Self::OpenAi(provider) => provider.dimensions(),
            Self::HuggingFace(provider) => provider.dimensions(),
            Self::Local(provider) => provider.dimensions(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::OpenAi(provider) => provider.model_name(),
            Self::HuggingFace(provider) => provider.model_name(),
            Self::Local(provider) => provider.model_name(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            Self::OpenAi(provider) => provider.embed(text).await,
            Self::HuggingFace(provider) => provider.embed(text).await,
            Self::Local(provider) => provider.embed(text).await,
        }
    }
}
