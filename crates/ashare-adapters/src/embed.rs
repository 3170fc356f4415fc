//! The embedding-service adapter contract.

use std::time::Duration;

use ashare_core::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retry::CircuitBreaker;

#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    /// Embeds a batch of texts; `batch_size` must not exceed
    /// [`EmbeddingAdapter::max_batch_size`]. Callers normalize by default.
    async fn embed_texts(&self, texts: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>>;

    async fn embed_text(&self, text: &str, deadline: Duration) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(std::slice::from_ref(&text.to_string()), deadline).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Internal("embedding adapter returned no vectors".into()))
    }

    fn embedding_dimension(&self) -> usize;
    fn max_batch_size(&self) -> usize;

    async fn health_check(&self) -> bool;
}

pub struct HttpEmbeddingAdapter {
    client: reqwest::Client,
    endpoint: String,
    dimension: usize,
    max_batch_size: usize,
    breaker: CircuitBreaker,
}

impl HttpEmbeddingAdapter {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        dimension: usize,
        max_batch_size: usize,
        breaker_threshold: u32,
        breaker_reset: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            dimension,
            max_batch_size,
            breaker: CircuitBreaker::new(breaker_threshold, breaker_reset),
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
    normalize: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingAdapter for HttpEmbeddingAdapter {
    async fn embed_texts(&self, texts: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>> {
        if texts.len() > self.max_batch_size {
            return Err(Error::Internal(format!(
                "batch of {} exceeds adapter max_batch_size {}",
                texts.len(),
                self.max_batch_size
            )));
        }

        self.breaker.check("embedding_adapter")?;

        let result = async {
            let response = self
                .client
                .post(&self.endpoint)
                .timeout(deadline)
                .json(&EmbedRequest {
                    texts,
                    normalize: true,
                })
                .send()
                .await
                .map_err(|e| Error::TransientExternal {
                    message: e.to_string(),
                })?;

            if !response.status().is_success() {
                return Err(Error::TransientExternal {
                    message: format!("embedding adapter returned {}", response.status()),
                });
            }

            let body: EmbedResponse = response.json().await.map_err(|e| Error::TransientExternal {
                message: e.to_string(),
            })?;
            Ok(body.vectors)
        }
        .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(&self.endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Deterministically embeds each text to a vector of its char count
    /// repeated to the configured dimension — good enough for asserting
    /// batch-boundary and dimension-validation behavior in tests.
    pub struct FakeEmbeddingAdapter {
        dimension: usize,
        max_batch_size: usize,
        calls: Mutex<Vec<usize>>,
        /// When set, the adapter returns a vector of this wrong dimension
        /// for the text at this index in its most recent call, simulating
        /// dimension drift (E6).
        pub wrong_dimension_index: Mutex<Option<(usize, usize)>>,
    }

    impl FakeEmbeddingAdapter {
        #[must_use]
        pub fn new(dimension: usize, max_batch_size: usize) -> Self {
            Self {
                dimension,
                max_batch_size,
                calls: Mutex::new(Vec::new()),
                wrong_dimension_index: Mutex::new(None),
            }
        }

        #[must_use]
        pub fn batch_sizes_seen(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmbeddingAdapter for FakeEmbeddingAdapter {
        async fn embed_texts(&self, texts: &[String], _deadline: Duration) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            let wrong = *self.wrong_dimension_index.lock().unwrap();
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let dim = match wrong {
                        Some((idx, wrong_dim)) if idx == i => wrong_dim,
                        _ => self.dimension,
                    };
                    vec![t.chars().count() as f32; dim]
                })
                .collect())
        }

        fn embedding_dimension(&self) -> usize {
            self.dimension
        }

        fn max_batch_size(&self) -> usize {
            self.max_batch_size
        }

        async fn health_check(&self) -> bool {
            true
        }
    }
}
