//! The minimal placeholder extraction synthesized for an annual report
//! whose company is already known, letting both the Gap Analyzer and the
//! Extract stage skip an LLM call for information we would only
//! rediscover.

use ashare_adapters::llm::{ExtractionData, ExtractionResult};
use ashare_core::models::DocType;

#[must_use]
pub fn known_company_extraction(company_code: &str) -> ExtractionResult {
    ExtractionResult {
        document_type: DocType::AnnualReport.as_str().to_string(),
        extraction_data: ExtractionData {
            company_code: Some(company_code.to_string()),
            business_concepts: Vec::new(),
            ..ExtractionData::default()
        },
        extraction_metadata: serde_json::json!({ "skipped_llm": true }),
    }
}
