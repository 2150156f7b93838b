use super::{check_count, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbedTextRequest<'a> {
    model: &'a str,
    inputs: Vec<String>,
}

/// Accepts the response shapes common embedding servers return
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

/// Embedder backed by an HTTP embedding server
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    retries: usize,
    model: String,
    provider: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)?;
        let endpoint = base_url
            .join(&config.endpoint)
            .map_err(|e| Error::Config(format!("Invalid embedding endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key(),
            retries: config.retries,
            model: config.model.clone(),
            provider: config.provider.clone(),
            dimension: config.dimension,
        })
    }

    async fn send_with_retry(&self, request: reqwest::RequestBuilder) -> Result<EmbeddingResponse> {
        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            let req = request
                .try_clone()
                .ok_or_else(|| Error::Embedding("Failed to clone embedding request".to_string()))?;
            match req.send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(ok) => return Ok(ok.json::<EmbeddingResponse>().await?),
                    Err(e) => last_err = Some(Error::Embedding(e.to_string())),
                },
                Err(e) => last_err = Some(Error::Embedding(e.to_string())),
            }

            if attempt < self.retries {
                warn!(attempt = attempt + 1, "Embedding request failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Embedding("Embedding request failed".to_string())))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        debug!(count = expected, model = %self.model, "Requesting embeddings");

        let body = EmbedTextRequest {
            model: &self.model,
            inputs: texts,
        };
        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let embeddings = self.send_with_retry(request).await?.into_embeddings();
        check_count(expected, &embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            url: server.uri(),
            dimension: 3,
            retries: 1,
            api_key_env: String::new(),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_embeddings_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .and(body_partial_json(serde_json::json!({"inputs": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config_for(&server)).unwrap();
        let out = embedder
            .embed(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[1], vec![0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn test_embed_data_shape_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let mut embedder = HttpEmbedder::new(&config_for(&server)).unwrap();
        embedder.api_key = Some("test-token".to_string());

        let out = embedder.embed(vec!["x".to_string()]).await.unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "vectors": [[1.0, 0.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config_for(&server)).unwrap();
        let err = embedder
            .embed(vec!["x".to_string(), "y".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_server_error_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config_for(&server)).unwrap();
        assert!(embedder.embed(vec!["x".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_input_skips_request() {
        let server = MockServer::start().await;
        let embedder = HttpEmbedder::new(&config_for(&server)).unwrap();
        assert!(embedder.embed(Vec::new()).await.unwrap().is_empty());
    }
}
