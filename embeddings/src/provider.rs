//! Embedding providers.
//!
//! The rest of the system only sees [`EmbeddingProvider`]: text goes in, a
//! fixed-length vector comes out. The model behind it is external.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Text to encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Text to embed.
    pub text: String,
}

impl EmbeddingRequest {
    /// Create a new embedding request.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Reject requests that carry nothing to encode.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(())
    }
}

/// A vector and the model that reports having produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The generated embedding.
    pub embedding: Embedding,

    /// Model name as reported by the provider. Empty if it reported none.
    pub model: String,
}

impl EmbeddingResponse {
    /// Length of the vector.
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Identity of the model that produced a set of vectors.
///
/// Vectors are only comparable when they come from the same model, so this
/// is persisted next to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    /// Provider name, e.g. `openai`.
    pub provider: String,

    /// Model name requested from the provider.
    pub model: String,

    /// Expected output dimension.
    pub dimension: usize,
}

impl ModelIdentity {
    /// Key used to compare models across runs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }

    /// Whether a model name reported in a response is this model.
    ///
    /// Providers may append a revision suffix (`text-embedding-ada-002-v2`).
    /// An empty name means the provider did not say and is accepted.
    pub fn matches_reported(&self, reported: &str) -> bool {
        reported.is_empty()
            || reported == self.model
            || reported
                .strip_prefix(self.model.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Get the default embedding dimension.
    fn default_dimension(&self) -> usize;

    /// Generate an embedding for the given text.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Check if the provider is available (API key set, etc.).
    fn is_available(&self) -> bool;

    /// Identity of the model this provider encodes with.
    fn model_identity(&self) -> ModelIdentity {
        ModelIdentity {
            provider: self.name().to_string(),
            model: self.default_model().to_string(),
            dimension: self.default_dimension(),
        }
    }
}

/// OpenAI-compatible embedding provider (`POST {base_url}/embeddings`).
pub struct OpenAIProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    model: String,
}

impl OpenAIProvider {
    /// Create a provider for `text-embedding-3-small`, reading the key from
    /// `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn request(&self, text: &str) -> Result<EmbeddingsBody> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(EmbeddingError::ProviderNotConfigured)?;

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "input": text, "model": self.model }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(EmbeddingError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!("{status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn default_dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        request.validate()?;

        let body = self.request(&request.text).await?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))?;

        debug!(
            "Encoded {} chars into {} dimensions with {}",
            request.text.len(),
            embedding.len(),
            body.model
        );

        Ok(EmbeddingResponse {
            embedding,
            model: body.model,
        })
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsBody {
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Bounds every call of the wrapped provider by a fixed duration.
///
/// A call that runs over fails with [`EmbeddingError::GatewayTimeout`]; the
/// caller decides whether to skip or retry.
pub struct TimeoutProvider<P> {
    inner: P,
    timeout: Duration,
}

impl<P> TimeoutProvider<P>
where
    P: EmbeddingProvider,
{
    /// Wrap a provider.
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<P> EmbeddingProvider for TimeoutProvider<P>
where
    P: EmbeddingProvider,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn default_dimension(&self) -> usize {
        self.inner.default_dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        match tokio::time::timeout(self.timeout, self.inner.embed(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Embedding request to {} timed out after {:?}",
                    self.inner.name(),
                    self.timeout
                );
                Err(EmbeddingError::GatewayTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn model_identity(&self) -> ModelIdentity {
        self.inner.model_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn default_model(&self) -> &str {
            "slow-model"
        }

        fn default_dimension(&self) -> usize {
            2
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(EmbeddingResponse {
                embedding: vec![1.0, 0.0],
                model: "slow-model".to_string(),
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn provider_for(server: &MockServer) -> OpenAIProvider {
        OpenAIProvider::new()
            .with_api_key("test-key")
            .with_base_url(server.uri())
    }

    #[test]
    fn test_model_identity_for_configured_model() {
        let provider = OpenAIProvider::new().with_model("text-embedding-3-large");
        assert_eq!(provider.default_dimension(), 3072);
        assert_eq!(
            provider.model_identity().key(),
            "openai/text-embedding-3-large"
        );
    }

    #[test]
    fn test_reported_model_matching() {
        let identity = OpenAIProvider::new()
            .with_model("text-embedding-ada-002")
            .model_identity();

        assert!(identity.matches_reported("text-embedding-ada-002"));
        assert!(identity.matches_reported("text-embedding-ada-002-v2"));
        assert!(identity.matches_reported(""));
        assert!(!identity.matches_reported("text-embedding-3-small"));
        assert!(!identity.matches_reported("text-embedding-ada-0021"));
    }

    #[tokio::test]
    async fn test_embed_rejects_blank_text() {
        let provider = OpenAIProvider::new().with_api_key("test-key");
        let result = provider.embed(EmbeddingRequest::new("   ")).await;
        assert!(matches!(result, Err(EmbeddingError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_openai_embed_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "input": "Solar microgrid pilot",
                "model": "text-embedding-3-small"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }],
                "model": "text-embedding-3-small",
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .embed(EmbeddingRequest::new("Solar microgrid pilot"))
            .await
            .unwrap();

        assert_eq!(response.embedding, vec![0.1, 0.2, 0.3]);
        assert_eq!(response.dimension(), 3);
        assert_eq!(response.model, "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_openai_empty_data_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [],
                "model": "text-embedding-3-small"
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .embed(EmbeddingRequest::new("text"))
            .await;
        assert!(matches!(result, Err(EmbeddingError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_openai_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .embed(EmbeddingRequest::new("text"))
            .await;
        match result {
            Err(EmbeddingError::ApiRequest(message)) => assert!(message.contains("overloaded")),
            other => panic!("expected ApiRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_openai_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .embed(EmbeddingRequest::new("text"))
            .await;

        assert!(matches!(
            result,
            Err(EmbeddingError::RateLimited {
                retry_after_secs: 7
            })
        ));
    }

    #[tokio::test]
    async fn test_openai_without_key_is_not_configured() {
        let provider = OpenAIProvider {
            api_key: None,
            base_url: "http://localhost:1".to_string(),
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
        };
        assert!(!provider.is_available());
        let result = provider.embed(EmbeddingRequest::new("text")).await;
        assert!(matches!(result, Err(EmbeddingError::ProviderNotConfigured)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_provider_times_out() {
        let provider = TimeoutProvider::new(SlowProvider, Duration::from_millis(100));
        let result = provider.embed(EmbeddingRequest::new("text")).await;
        assert!(matches!(
            result,
            Err(EmbeddingError::GatewayTimeout { timeout_ms: 100 })
        ));
        assert_eq!(provider.model_identity().key(), "slow/slow-model");
    }
}
