#![forbid(unsafe_code)]
//! Port traits for the two external adapters (LLM extraction, embedding)
//! and the shared retry/circuit-breaker helper backing their call sites.

pub mod embed;
pub mod llm;
pub mod retry;

pub use embed::EmbeddingAdapter;
pub use llm::LlmExtractor;
