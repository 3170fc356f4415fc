//! The large-language-model extraction adapter contract. The adapter itself
//! (the model call) is an external collaborator; only its port trait lives
//! here, plus a `reqwest`-backed implementation and an in-memory fake for
//! tests.

use std::time::Duration;

use ashare_core::error::{Error, Result};
use ashare_core::models::DocType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retry::CircuitBreaker;

/// `extraction_data` shape shared across annual and research reports; a
/// tagged record with per-`doc_type` fields left optional, plus a generic
/// `extra` bucket for whatever the fusion algorithm never reads.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionData {
    pub company_code: Option<String>,
    pub company_name_full: Option<String>,
    pub company_name_short: Option<String>,
    pub exchange: Option<String>,
    pub report_title: Option<String>,
    #[serde(default)]
    pub business_concepts: Vec<ExtractedConcept>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedConcept {
    pub concept_name: String,
    pub concept_category: String,
    pub importance_score: f64,
    #[serde(default)]
    pub development_stage: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metrics: serde_json::Value,
    #[serde(default)]
    pub timeline: serde_json::Value,
    #[serde(default)]
    pub customers: Vec<String>,
    #[serde(default)]
    pub partners: Vec<String>,
    #[serde(default)]
    pub subsidiaries_or_investees: Vec<String>,
    #[serde(default)]
    pub source_sentences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub document_type: String,
    pub extraction_data: ExtractionData,
    pub extraction_metadata: serde_json::Value,
}

/// Deadline-aware, idempotent (no cross-call state) extraction adapter.
#[async_trait]
pub trait LlmExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        doc_type_hint: DocType,
        deadline: Duration,
    ) -> Result<ExtractionResult>;
}

/// Production adapter calling an HTTP extraction service, guarded by a
/// per-instance circuit breaker so a persistent outage fails fast instead of
/// queuing every document behind the full retry/backoff schedule.
pub struct HttpLlmExtractor {
    client: reqwest::Client,
    endpoint: String,
    breaker: CircuitBreaker,
}

impl HttpLlmExtractor {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, breaker_threshold: u32, breaker_reset: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            breaker: CircuitBreaker::new(breaker_threshold, breaker_reset),
        }
    }
}

#[async_trait]
impl LlmExtractor for HttpLlmExtractor {
    async fn extract(
        &self,
        text: &str,
        doc_type_hint: DocType,
        deadline: Duration,
    ) -> Result<ExtractionResult> {
        self.breaker.check("llm_extractor")?;

        #[derive(Serialize)]
        struct Request<'a> {
            text: &'a str,
            doc_type_hint: &'static str,
        }

        let result = async {
            let response = self
                .client
                .post(&self.endpoint)
                .timeout(deadline)
                .json(&Request {
                    text,
                    doc_type_hint: doc_type_hint.as_str(),
                })
                .send()
                .await
                .map_err(|e| Error::TransientExternal {
                    message: e.to_string(),
                })?;

            if !response.status().is_success() {
                return Err(Error::TransientExternal {
                    message: format!("extraction adapter returned {}", response.status()),
                });
            }

            response
                .json::<ExtractionResult>()
                .await
                .map_err(|e| Error::TransientExternal {
                    message: e.to_string(),
                })
        }
        .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Returns a fixed, scripted sequence of results in order, recording
    /// every call it received — used by pipeline tests to assert call
    /// counts for the cost-avoidance shortcuts.
    pub struct FakeLlmExtractor {
        results: Mutex<Vec<Result<ExtractionResult>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLlmExtractor {
        #[must_use]
        pub fn new(results: Vec<ExtractionResult>) -> Self {
            Self {
                results: Mutex::new(results.into_iter().map(Ok).rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmExtractor for FakeLlmExtractor {
        async fn extract(
            &self,
            text: &str,
            _doc_type_hint: DocType,
            _deadline: Duration,
        ) -> Result<ExtractionResult> {
            self.calls.lock().unwrap().push(text.to_string());
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::Internal("no more scripted results".into())))
        }
    }
}
