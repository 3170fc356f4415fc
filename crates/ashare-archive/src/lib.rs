#![forbid(unsafe_code)]
//! Idempotent persistence of one extracted document plus the minimal
//! company upsert that accompanies annual-report archival.

use ashare_adapters::llm::ExtractionData;
use ashare_core::error::{Error, Result};
use ashare_core::models::DocType;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

const PLACEHOLDER_TOKENS: [&str; 6] = ["待更新", "Company ", "未知", "Unknown", "TBD", "N/A"];

fn is_chinese(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

fn chinese_char_count(s: &str) -> usize {
    s.chars().filter(|c| is_chinese(*c)).count()
}

/// Whether `new_value` is of higher quality than `old_value` under the
/// three-rule policy: placeholder tokens in the old value, a >1.5x length
/// increase, or a Chinese-character-majority improvement.
#[must_use]
pub fn is_higher_quality(old_value: &str, new_value: &str) -> bool {
    if PLACEHOLDER_TOKENS.iter().any(|t| old_value.contains(t)) {
        return true;
    }
    if (new_value.chars().count() as f64) > 1.5 * old_value.chars().count() as f64 {
        return true;
    }
    let new_chinese = chinese_char_count(new_value);
    let old_chinese = chinese_char_count(old_value);
    let new_len = new_value.chars().count().max(1);
    new_chinese > old_chinese && (new_chinese as f64 / new_len as f64) > 0.3
}

/// Archives one document. For annual reports, creates or quality-upgrades
/// the owning `Company` row first; for research reports, requires the
/// company to already exist and fails with [`Error::UnknownCompany`]
/// otherwise. Idempotent on `file_hash` uniqueness: a re-archive attempt for
/// an already-known hash surfaces [`Error::DuplicateFileHash`], which the
/// orchestrator's Archive stage treats as "already done" rather than a
/// fatal error.
#[allow(clippy::too_many_arguments)]
pub async fn save(
    pool: &PgPool,
    doc_type: DocType,
    company_code: &str,
    doc_date: NaiveDate,
    report_title: &str,
    file_path: &str,
    file_hash: &str,
    raw_llm_output: &Value,
    extraction_metadata: &Value,
    original_content: Option<&str>,
    extraction_data: &ExtractionData,
) -> Result<Uuid> {
    match doc_type {
        DocType::AnnualReport => upsert_company_from_extraction(pool, company_code, extraction_data).await?,
        DocType::ResearchReport => {
            let existing = ashare_db::queries::find_company(pool, company_code).await?;
            if existing.is_none() {
                return Err(Error::UnknownCompany {
                    code: company_code.to_string(),
                });
            }
        }
    }

    ashare_db::queries::insert_source_document(
        pool,
        company_code,
        doc_type.as_str(),
        doc_date,
        report_title,
        file_path,
        file_hash,
        raw_llm_output,
        extraction_metadata,
        original_content,
    )
    .await
}

async fn upsert_company_from_extraction(
    pool: &PgPool,
    company_code: &str,
    extraction_data: &ExtractionData,
) -> Result<()> {
    let name_full = extraction_data.company_name_full.clone().unwrap_or_default();
    let name_short = extraction_data.company_name_short.clone().unwrap_or_default();
    let exchange = extraction_data.exchange.clone().unwrap_or_default();

    match ashare_db::queries::find_company(pool, company_code).await? {
        None => {
            ashare_db::queries::insert_company(pool, company_code, &name_full, &name_short, &exchange)
                .await
        }
        Some(existing) => {
            let new_full = if is_higher_quality(&existing.name_full, &name_full) {
                &name_full
            } else {
                &existing.name_full
            };
            let new_short = if is_higher_quality(&existing.name_short, &name_short) {
                &name_short
            } else {
                &existing.name_short
            };
            let new_exchange = if is_higher_quality(&existing.exchange, &exchange) {
                &exchange
            } else {
                &existing.exchange
            };
            if new_full != &existing.name_full
                || new_short != &existing.name_short
                || new_exchange != &existing.exchange
            {
                ashare_db::queries::update_company_names(
                    pool,
                    company_code,
                    new_full,
                    new_short,
                    new_exchange,
                )
                .await
            } else {
                Ok(())
            }
        }
    }
}
