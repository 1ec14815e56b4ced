//! HTTP rerank API providers.
//!
//! Both providers speak the same wire format: a JSON body with `model`,
//! `query`, `documents` and `top_n`, answered with
//! `{"results": [{"index": .., "relevance_score": ..}]}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use retrieval_core::{
    CrossEncoderConfig, HttpEndpointConfig, Ranking, RerankDocument, RerankScore, Reranker,
    Result, RetrievalError,
};

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    relevance_score: f32,
}

/// Shared client for rerank APIs.
struct RerankApi {
    provider: &'static str,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl RerankApi {
    fn new(
        provider: &'static str,
        endpoint: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::provider(provider, format!("client error: {e}")))?;

        Ok(Self {
            provider,
            client,
            endpoint: endpoint.to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_k: usize,
    ) -> Result<Ranking> {
        let top_n = top_k.min(documents.len());
        let body = RerankRequest {
            model: &self.model,
            query,
            documents: documents.iter().map(|d| d.text.as_str()).collect(),
            top_n,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::provider(self.provider, format!("HTTP error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::provider(
                self.provider,
                format!("API returned {status}: {body}"),
            ));
        }

        let resp: RerankResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::provider(self.provider, format!("JSON parse error: {e}")))?;

        let mut scores = Vec::with_capacity(resp.results.len().min(top_n));
        for hit in resp.results.into_iter().take(top_n) {
            let doc = documents.get(hit.index).ok_or_else(|| {
                RetrievalError::provider(
                    self.provider,
                    format!("result index {} out of range", hit.index),
                )
            })?;
            scores.push(RerankScore {
                index: doc.index,
                relevance_score: hit.relevance_score,
            });
        }

        debug!("{} reranking completed: {} results", self.provider, scores.len());
        Ok(Ranking::Scored(scores))
    }
}

/// Batch cross-encoder rerank API.
pub struct CrossEncoderReranker {
    api: RerankApi,
}

impl CrossEncoderReranker {
    pub fn new(config: &CrossEncoderConfig, api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: RerankApi::new(
                "cross_encoder",
                &config.endpoint,
                api_key,
                &config.model,
                timeout,
            )?,
        })
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &str {
        self.api.provider
    }

    async fn score(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_k: usize,
    ) -> Result<Ranking> {
        self.api.rerank(query, documents, top_k).await
    }
}

/// Plain HTTP rerank endpoint with bearer authentication.
pub struct HttpEndpointReranker {
    api: RerankApi,
}

impl HttpEndpointReranker {
    pub fn new(config: &HttpEndpointConfig, api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: RerankApi::new(
                "http_endpoint",
                &config.endpoint,
                api_key,
                &config.model,
                timeout,
            )?,
        })
    }
}

#[async_trait]
impl Reranker for HttpEndpointReranker {
    fn name(&self) -> &str {
        self.api.provider
    }

    async fn score(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_k: usize,
    ) -> Result<Ranking> {
        self.api.rerank(query, documents, top_k).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port and return its URL.
    pub(crate) async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];

            // Read headers, then the declared body length
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}/v1/rerank", addr)
    }

    fn documents() -> Vec<RerankDocument> {
        ["rent cap is five percent", "weather is sunny", "deposit rules"]
            .iter()
            .enumerate()
            .map(|(index, text)| RerankDocument {
                index,
                text: text.to_string(),
            })
            .collect()
    }

    fn endpoint_config(endpoint: String) -> HttpEndpointConfig {
        HttpEndpointConfig {
            endpoint,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_endpoint_maps_scores() {
        let url = serve_once(
            "200 OK",
            r#"{"results":[{"index":2,"relevance_score":0.8},{"index":0,"relevance_score":0.6}]}"#,
        )
        .await;

        let reranker = HttpEndpointReranker::new(
            &endpoint_config(url),
            "key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        let ranking = reranker.score("rent", &documents(), 2).await.unwrap();
        assert_eq!(
            ranking,
            Ranking::Scored(vec![
                RerankScore {
                    index: 2,
                    relevance_score: 0.8
                },
                RerankScore {
                    index: 0,
                    relevance_score: 0.6
                },
            ])
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_provider_error() {
        let url = serve_once("503 Service Unavailable", r#"{"error":"overloaded"}"#).await;

        let reranker = CrossEncoderReranker::new(
            &CrossEncoderConfig {
                endpoint: url,
                ..Default::default()
            },
            "key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = reranker.score("rent", &documents(), 2).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Provider { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_provider_error() {
        let url = serve_once(
            "200 OK",
            r#"{"results":[{"index":7,"relevance_score":0.9}]}"#,
        )
        .await;

        let reranker = HttpEndpointReranker::new(
            &endpoint_config(url),
            "key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(reranker.score("rent", &documents(), 3).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_provider_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reranker = HttpEndpointReranker::new(
            &endpoint_config(format!("http://{}/v1/rerank", addr)),
            "key".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = reranker.score("rent", &documents(), 2).await.unwrap_err();
        assert!(err.is_transient());
    }
}
