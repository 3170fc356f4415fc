//! Data-access functions used by the archive writer, fusion engine, and
//! vector index builder. Every query is a plain runtime-checked
//! `sqlx::query`/`query_as` call (not the `query!` macro family) so the
//! workspace can be built without a live database reachable at compile time.

use std::collections::HashSet;

use ashare_core::error::{Error, Result};
use ashare_core::models::{Company, ConceptCategory, SourceDocument};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::error::DatabaseError;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn find_company(pool: &PgPool, code: &str) -> Result<Option<Company>> {
    let row = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn insert_company(
    pool: &PgPool,
    code: &str,
    name_full: &str,
    name_short: &str,
    exchange: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO companies (code, name_full, name_short, exchange, created_at, updated_at)
         VALUES ($1, $2, $3, $4, now(), now())",
    )
    .bind(code)
    .bind(name_full)
    .bind(name_short)
    .bind(exchange)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_company_names(
    pool: &PgPool,
    code: &str,
    name_full: &str,
    name_short: &str,
    exchange: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE companies SET name_full = $2, name_short = $3, exchange = $4, updated_at = now()
         WHERE code = $1",
    )
    .bind(code)
    .bind(name_full)
    .bind(name_short)
    .bind(exchange)
    .execute(pool)
    .await?;
    Ok(())
}

/// All `companies.code` values, loaded once per run for the gap analyzer's
/// cost-avoidance shortcut and advanced in-process thereafter.
pub async fn existing_company_codes(pool: &PgPool) -> Result<HashSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT code FROM companies")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(c,)| c).collect())
}

/// All non-null `source_documents.file_hash` values, loaded once per run.
pub async fn known_file_hashes(pool: &PgPool) -> Result<HashSet<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT file_hash FROM source_documents WHERE file_hash IS NOT NULL")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(h,)| h).collect())
}

pub async fn find_source_document_by_hash(
    pool: &PgPool,
    file_hash: &str,
) -> Result<Option<SourceDocument>> {
    let row = sqlx::query_as::<_, SourceDocument>(
        "SELECT * FROM source_documents WHERE file_hash = $1",
    )
    .bind(file_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_source_document_by_path(
    pool: &PgPool,
    file_path: &str,
) -> Result<Option<SourceDocument>> {
    let row = sqlx::query_as::<_, SourceDocument>(
        "SELECT * FROM source_documents WHERE file_path = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(file_path)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_source_document(
    pool: &PgPool,
    company_code: &str,
    doc_type: &str,
    doc_date: NaiveDate,
    report_title: &str,
    file_path: &str,
    file_hash: &str,
    raw_llm_output: &Value,
    extraction_metadata: &Value,
    original_content: Option<&str>,
) -> Result<Uuid> {
    let doc_id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO source_documents
            (doc_id, company_code, doc_type, doc_date, report_title, file_path, file_hash,
             raw_llm_output, extraction_metadata, original_content, processing_status, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'completed', now())",
    )
    .bind(doc_id)
    .bind(company_code)
    .bind(doc_type)
    .bind(doc_date)
    .bind(report_title)
    .bind(file_path)
    .bind(file_hash)
    .bind(raw_llm_output)
    .bind(extraction_metadata)
    .bind(original_content)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(doc_id),
        Err(sqlx::Error::Database(db_err))
            if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation =>
        {
            Err(Error::DuplicateFileHash {
                hash: file_hash.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Row shape returned by concept-lookup queries; mirrors
/// `BusinessConceptMaster` but keeps `concept_details`/`embedding` as raw
/// columns so the fusion engine controls (de)serialization.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConceptRow {
    pub concept_id: Uuid,
    pub company_code: String,
    pub concept_name: String,
    pub concept_category: String,
    pub importance_score: Decimal,
    pub development_stage: String,
    pub concept_details: Value,
    pub embedding: Option<pgvector::Vector>,
    pub last_updated_from_doc_id: Option<Uuid>,
    pub version: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn find_concept_by_name(
    pool: &PgPool,
    company_code: &str,
    concept_name: &str,
) -> Result<Option<ConceptRow>> {
    let row = sqlx::query_as::<_, ConceptRow>(
        "SELECT * FROM business_concepts_master WHERE company_code = $1 AND concept_name = $2",
    )
    .bind(company_code)
    .bind(concept_name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_concept(
    pool: &PgPool,
    company_code: &str,
    concept_name: &str,
    category: ConceptCategory,
    importance_score: Decimal,
    development_stage: &str,
    concept_details: &Value,
    doc_id: Uuid,
) -> Result<Uuid> {
    let concept_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO business_concepts_master
            (concept_id, company_code, concept_name, concept_category, importance_score,
             development_stage, concept_details, last_updated_from_doc_id, version, is_active,
             created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, true, now(), now())",
    )
    .bind(concept_id)
    .bind(company_code)
    .bind(concept_name)
    .bind(category.as_str())
    .bind(importance_score)
    .bind(development_stage)
    .bind(concept_details)
    .bind(doc_id)
    .execute(pool)
    .await?;
    Ok(concept_id)
}

/// Applies a fusion merge under optimistic locking: the `UPDATE` carries a
/// `WHERE version = $expected_version` predicate. A zero-row result means
/// another writer won the race; the caller raises `OptimisticLockConflict`.
#[allow(clippy::too_many_arguments)]
pub async fn update_concept_fusion(
    pool: &PgPool,
    concept_id: Uuid,
    expected_version: i32,
    importance_score: Decimal,
    development_stage: &str,
    concept_details: &Value,
    doc_id: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE business_concepts_master
         SET importance_score = $1,
             development_stage = $2,
             concept_details = $3,
             last_updated_from_doc_id = $4,
             version = version + 1,
             updated_at = now()
         WHERE concept_id = $5 AND version = $6",
    )
    .bind(importance_score)
    .bind(development_stage)
    .bind(concept_details)
    .bind(doc_id)
    .bind(concept_id)
    .bind(expected_version)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Concepts lacking an embedding (or, on rebuild, every active concept) for
/// one company, ordered deterministically.
pub async fn concepts_needing_embedding(
    pool: &PgPool,
    company_code: &str,
    rebuild: bool,
) -> Result<Vec<ConceptRow>> {
    let sql = if rebuild {
        "SELECT * FROM business_concepts_master WHERE company_code = $1 AND is_active
         ORDER BY concept_name"
    } else {
        "SELECT * FROM business_concepts_master
         WHERE company_code = $1 AND is_active AND embedding IS NULL
         ORDER BY concept_name"
    };
    let rows = sqlx::query_as::<_, ConceptRow>(sql)
        .bind(company_code)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Writes only the `embedding` column; deliberately does not touch `version`.
pub async fn update_embedding(pool: &PgPool, concept_id: Uuid, embedding: &[f32]) -> Result<()> {
    let vector = pgvector::Vector::from(embedding.to_vec());
    sqlx::query("UPDATE business_concepts_master SET embedding = $1 WHERE concept_id = $2")
        .bind(vector)
        .bind(concept_id)
        .execute(pool)
        .await?;
    Ok(())
}
