//! Embedding provider port and HTTP adapter
//!
//! The core never generates embeddings itself; it calls this port and
//! validates whatever comes back. The shipped adapter talks to an HTTP
//! service with retry and exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Failures reported by an embedding provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rate limited the request")]
    RateLimited,

    #[error("provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

/// The outbound capability that maps texts to dense vectors.
///
/// `proxy_url` is opaque to the core; the adapter decides how to honor it.
/// Implementations must return exactly one vector per input text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        model: &str,
        proxy_url: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;
}

/// HTTP embedding client
///
/// POSTs `{model, input}` to `<endpoint>/embeddings`, where the endpoint is
/// the per-call `proxy_url` when non-empty and the configured base URL
/// otherwise.
#[derive(Clone)]
pub struct HttpEmbeddingClient {
    base_url: String,
    client: Client,
}

impl HttpEmbeddingClient {
    const MAX_RETRIES: u32 = 3;
    const INITIAL_BACKOFF_MS: u64 = 100;

    /// Create a new client with a bounded request timeout.
    pub fn new(base_url: String, timeout_seconds: u64) -> std::result::Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        info!("Created embedding client with base URL: {}", base_url);

        Ok(Self { base_url, client })
    }

    fn endpoint(&self, proxy_url: &str) -> String {
        let base = if proxy_url.is_empty() {
            self.base_url.as_str()
        } else {
            proxy_url
        };
        format!("{}/embeddings", base.trim_end_matches('/'))
    }

    async fn post_with_retry(
        &self,
        url: &str,
        request: &EmbedRequest,
    ) -> std::result::Result<EmbedResponse, ProviderError> {
        let mut retries = 0;
        let mut backoff_ms = Self::INITIAL_BACKOFF_MS;

        loop {
            match self.client.post(url).json(request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<EmbedResponse>().await.map_err(|e| {
                            ProviderError::InvalidResponse(format!("failed to parse body: {e}"))
                        });
                    }
                    if status.as_u16() == 429 {
                        return Err(ProviderError::RateLimited);
                    }
                    if status.is_client_error() {
                        // Terminal: the request itself is wrong.
                        let body = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Other(format!(
                            "provider rejected request with {status}: {body}"
                        )));
                    }

                    // Server error, possibly transient.
                    if retries < Self::MAX_RETRIES {
                        warn!(
                            "Embedding request failed with status {} (attempt {}/{})",
                            status,
                            retries + 1,
                            Self::MAX_RETRIES + 1
                        );
                        retries += 1;
                        sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms *= 2;
                        continue;
                    }
                    return Err(ProviderError::Transport(format!(
                        "provider returned {status} after {} retries",
                        Self::MAX_RETRIES
                    )));
                }
                Err(e) => {
                    if retries < Self::MAX_RETRIES {
                        warn!(
                            "Network error during embedding request (attempt {}/{}): {}",
                            retries + 1,
                            Self::MAX_RETRIES + 1,
                            e
                        );
                        retries += 1;
                        sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms *= 2;
                        continue;
                    }
                    return Err(ProviderError::Transport(format!(
                        "failed to reach provider after {} retries: {e}",
                        Self::MAX_RETRIES
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(
        &self,
        texts: &[String],
        model: &str,
        proxy_url: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Requesting {} embeddings from model {}",
            texts.len(),
            model
        );

        let url = self.endpoint(proxy_url);
        let request = EmbedRequest {
            model: model.to_string(),
            input: texts.to_vec(),
        };

        let response = self.post_with_retry(&url, &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings but got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_endpoint_selection() {
        let client = HttpEmbeddingClient::new("http://localhost:11434".to_string(), 5).unwrap();
        assert_eq!(client.endpoint(""), "http://localhost:11434/embeddings");
        assert_eq!(
            client.endpoint("https://proxy.example/v1/"),
            "https://proxy.example/v1/embeddings"
        );
    }

    #[tokio::test]
    async fn test_embed_empty_input_short_circuits() {
        let client = HttpEmbeddingClient::new("http://localhost:1".to_string(), 1).unwrap();
        let out = client.embed(&[], "m", "").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "m"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0], [0.0, 1.0]]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(server.uri(), 5).unwrap();
        let out = client
            .embed(&["a".to_string(), "b".to_string()], "m", "")
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_embed_arity_mismatch_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(server.uri(), 5).unwrap();
        let err = client
            .embed(&["a".to_string(), "b".to_string()], "m", "")
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_variant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(server.uri(), 5).unwrap();
        let err = client.embed(&["a".to_string()], "m", "").await.unwrap_err();
        assert_eq!(err, ProviderError::RateLimited);
    }

    #[tokio::test]
    async fn test_client_error_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(server.uri(), 5).unwrap();
        let err = client.embed(&["a".to_string()], "m", "").await.unwrap_err();
        assert!(matches!(err, ProviderError::Other(_)));
    }

    #[tokio::test]
    async fn test_server_error_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.5, 0.5]]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(server.uri(), 5).unwrap();
        let out = client.embed(&["a".to_string()], "m", "").await.unwrap();
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_proxy_url_overrides_base() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0]]
            })))
            .mount(&server)
            .await;

        // Base URL points nowhere; the proxy carries the request.
        let client = HttpEmbeddingClient::new("http://localhost:1".to_string(), 5).unwrap();
        let out = client
            .embed(&["a".to_string()], "m", &server.uri())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
    }
}
