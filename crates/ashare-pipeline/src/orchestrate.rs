#![allow(clippy::too_many_lines)]
//! Drives each work item through Extract → Archive → Fuse → Vectorize
//! under a bounded-concurrency semaphore, updating the checkpoint after
//! every stage and never advancing past a stage that didn't durably
//! succeed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ashare_adapters::embed::EmbeddingAdapter;
use ashare_adapters::llm::{ExtractionResult, LlmExtractor};
use ashare_adapters::retry::retry_with_backoff;
use ashare_core::config::Config;
use ashare_core::error::{Error, Result};
use ashare_core::metrics::MetricsRegistry;
use ashare_core::models::{CheckpointRecord, DocType, StageName, StageStatus};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::gap::WorkItem;
use crate::{paths, synthesize};

pub struct Orchestrator {
    pub cfg: Config,
    pub pool: PgPool,
    pub llm: Arc<dyn LlmExtractor>,
    pub embedder: Arc<dyn EmbeddingAdapter>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Per-run totals reported at the end of a pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub lock_skipped: u32,
    pub cancelled: u32,
    pub concepts_created: u32,
    pub concepts_updated: u32,
    pub embedded: u32,
    pub errors_by_category: HashMap<String, u32>,
}

enum DocOutcome {
    Succeeded { created: u32, updated: u32, embedded: u32 },
    LockSkipped,
    Cancelled,
    Failed { category: String },
}

impl Orchestrator {
    /// Runs every item in `work_items`, bounded to `cfg.max_concurrent`
    /// concurrent documents, until all complete or `cancel` fires.
    pub async fn run(&self, work_items: Vec<WorkItem>, cancel: CancellationToken) -> RunSummary {
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(work_items.len());

        for item in work_items {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let cfg = self.cfg.clone();
            let pool = self.pool.clone();
            let llm = Arc::clone(&self.llm);
            let embedder = Arc::clone(&self.embedder);
            let metrics = Arc::clone(&self.metrics);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_one(&cfg, &pool, llm.as_ref(), embedder.as_ref(), &metrics, item, &cancel).await
            }));
        }

        let mut summary = RunSummary::default();
        for handle in handles {
            summary.processed += 1;
            match handle.await {
                Ok(DocOutcome::Succeeded { created, updated, embedded }) => {
                    summary.succeeded += 1;
                    summary.concepts_created += created;
                    summary.concepts_updated += updated;
                    summary.embedded += embedded;
                }
                Ok(DocOutcome::LockSkipped) => summary.lock_skipped += 1,
                Ok(DocOutcome::Cancelled) => summary.cancelled += 1,
                Ok(DocOutcome::Failed { category }) => {
                    summary.failed += 1;
                    *summary.errors_by_category.entry(category).or_insert(0) += 1;
                }
                Err(_join_err) => {
                    summary.failed += 1;
                    *summary.errors_by_category.entry("internal".to_string()).or_insert(0) += 1;
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            lock_skipped = summary.lock_skipped,
            cancelled = summary.cancelled,
            "pipeline run complete"
        );
        summary
    }
}

async fn process_one(
    cfg: &Config,
    pool: &PgPool,
    llm: &dyn LlmExtractor,
    embedder: &dyn EmbeddingAdapter,
    metrics: &MetricsRegistry,
    item: WorkItem,
    cancel: &CancellationToken,
) -> DocOutcome {
    let WorkItem {
        path,
        doc_type,
        file_hash,
        mut checkpoint,
    } = item;

    let lock_guard = {
        let locks_dir = cfg.locks_dir.clone();
        let source_path = path.clone();
        let timeout = Duration::from_secs(cfg.lock_timeout_secs);
        let poll = Duration::from_millis(cfg.lock_poll_interval_ms);
        let stale = Duration::from_secs(cfg.lock_stale_timeout_secs);
        tokio::task::spawn_blocking(move || ashare_lock::acquire(&locks_dir, &source_path, timeout, poll, stale))
            .await
    };

    let _guard = match lock_guard {
        Ok(Ok(Some(guard))) => guard,
        Ok(Ok(None)) => {
            metrics.record_lock_skipped();
            return DocOutcome::LockSkipped;
        }
        Ok(Err(_)) | Err(_) => {
            metrics.record_lock_skipped();
            return DocOutcome::LockSkipped;
        }
    };

    if cancel.is_cancelled() {
        return DocOutcome::Cancelled;
    }

    let checkpoints_dir = cfg.checkpoints_dir.clone();

    let extraction = match stage_extract(cfg, pool, llm, metrics, &path, doc_type, &checkpoints_dir, &mut checkpoint, cancel).await {
        Ok(r) => r,
        Err(Error::Cancelled) => return DocOutcome::Cancelled,
        Err(e) => return DocOutcome::Failed { category: e.category().to_string() },
    };

    if cancel.is_cancelled() {
        return DocOutcome::Cancelled;
    }

    let doc_id = match stage_archive(
        pool,
        &path,
        doc_type,
        &file_hash,
        &extraction,
        &checkpoints_dir,
        &mut checkpoint,
    )
    .await
    {
        Ok(Some(doc_id)) => doc_id,
        Ok(None) => {
            // Archived as a skip (e.g. file_path/hash mismatch); nothing
            // further can be fused or vectorized without a doc_id.
            return DocOutcome::Succeeded { created: 0, updated: 0, embedded: 0 };
        }
        Err(e) => return DocOutcome::Failed { category: e.category().to_string() },
    };

    if cancel.is_cancelled() {
        return DocOutcome::Cancelled;
    }

    let company_code = extraction
        .extraction_data
        .company_code
        .clone()
        .unwrap_or_default();

    let (created, updated) =
        stage_fuse(cfg, pool, &company_code, doc_id, &extraction, &checkpoints_dir, &mut checkpoint).await;

    if cancel.is_cancelled() {
        return DocOutcome::Cancelled;
    }

    let embedded = match stage_vectorize(cfg, pool, embedder, metrics, &company_code, &checkpoints_dir, &mut checkpoint, cancel).await {
        Ok(embedded) => embedded,
        Err(Error::Cancelled) => return DocOutcome::Cancelled,
        Err(_) => 0,
    };

    DocOutcome::Succeeded { created, updated, embedded }
}

#[allow(clippy::too_many_arguments)]
async fn stage_extract(
    cfg: &Config,
    pool: &PgPool,
    llm: &dyn LlmExtractor,
    metrics: &MetricsRegistry,
    path: &Path,
    doc_type: DocType,
    checkpoints_dir: &Path,
    checkpoint: &mut CheckpointRecord,
    cancel: &CancellationToken,
) -> Result<ExtractionResult> {
    let span = tracing::info_span!("stage", stage = "extraction", path = %path.display());
    let _enter = span.enter();
    let start = Instant::now();

    if checkpoint.is_success(StageName::Extraction) {
        let extracted_path = paths::extracted_json_path(cfg, doc_type, path);
        if let Ok(result) = load_extraction(&extracted_path) {
            return Ok(result);
        }
    }

    let extracted_path = paths::extracted_json_path(cfg, doc_type, path);
    if extracted_path.exists() {
        let result = load_extraction(&extracted_path)?;
        let mut fields = serde_json::Map::new();
        fields.insert(
            "output_path".to_string(),
            serde_json::Value::String(extracted_path.display().to_string()),
        );
        ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Extraction, StageStatus::Success, fields, None)?;
        metrics.record_stage_success(StageName::Extraction, elapsed_ms(start));
        return Ok(result);
    }

    if doc_type == DocType::AnnualReport {
        if let Some(code) = &checkpoint_company_hint(path) {
            if ashare_db::queries::find_company(pool, code).await?.is_some() {
                let synthesized = synthesize::known_company_extraction(code);
                write_extraction(&extracted_path, &synthesized)?;
                let mut fields = serde_json::Map::new();
                fields.insert("skipped_llm".to_string(), serde_json::Value::Bool(true));
                ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Extraction, StageStatus::Success, fields, None)?;
                metrics.record_llm_call_skipped();
                metrics.record_stage_success(StageName::Extraction, elapsed_ms(start));
                return Ok(synthesized);
            }
        }
    }

    let (text, _encoding) = ashare_fingerprint::read_text_with_fallback(path)?;
    let deadline = cfg.llm_timeout();
    let max_attempts = cfg.retry_max_attempts;
    let base = Duration::from_millis(cfg.retry_base_delay_ms);
    let max = Duration::from_millis(cfg.retry_max_delay_ms);

    let result = tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        r = retry_with_backoff(max_attempts, base, max, |_attempt| {
            let text = text.clone();
            async move { llm.extract(&text, doc_type, deadline).await }
        }) => r,
    };

    match result {
        Ok(extraction) => {
            write_extraction(&extracted_path, &extraction)?;
            let mut fields = serde_json::Map::new();
            fields.insert(
                "output_path".to_string(),
                serde_json::Value::String(extracted_path.display().to_string()),
            );
            ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Extraction, StageStatus::Success, fields, None)?;
            metrics.record_stage_success(StageName::Extraction, elapsed_ms(start));
            Ok(extraction)
        }
        Err(e) => {
            ashare_checkpoint::update_stage(
                checkpoints_dir,
                checkpoint,
                StageName::Extraction,
                StageStatus::Failed,
                serde_json::Map::new(),
                Some(e.error_type().to_string()),
            )?;
            metrics.record_stage_failed(StageName::Extraction, elapsed_ms(start));
            Err(e)
        }
    }
}

/// The company code hinted by the filename alone; used only to decide
/// whether the cost-avoidance synthesis applies without paying for a full
/// file read when the checkpoint already marked extraction done.
fn checkpoint_company_hint(path: &Path) -> Option<String> {
    ashare_fingerprint::extract_company_code(path, None)
}

fn load_extraction(path: &Path) -> Result<ExtractionResult> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| Error::CorruptExtractedJson {
        path: path.display().to_string(),
        source: e,
    })
}

fn write_extraction(path: &Path, result: &ExtractionResult) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(result)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn stage_archive(
    pool: &PgPool,
    path: &Path,
    doc_type: DocType,
    known_hash: &str,
    extraction: &ExtractionResult,
    checkpoints_dir: &Path,
    checkpoint: &mut CheckpointRecord,
) -> Result<Option<Uuid>> {
    let span = tracing::info_span!("stage", stage = "archive", path = %path.display());
    let _enter = span.enter();

    if checkpoint.is_success(StageName::Archive) {
        if let Some(doc_id) = checkpoint
            .stages
            .get(&StageName::Archive)
            .and_then(|s| s.fields.get("doc_id"))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            return Ok(Some(doc_id));
        }
    }

    let current_hash = ashare_fingerprint::hash_file(path).unwrap_or_else(|_| known_hash.to_string());
    if current_hash != checkpoint.file_hash {
        checkpoint.file_hash = current_hash.clone();
    }

    if let Some(existing) = ashare_db::queries::find_source_document_by_hash(pool, &current_hash).await? {
        let mut fields = serde_json::Map::new();
        fields.insert("doc_id".to_string(), serde_json::Value::String(existing.doc_id.to_string()));
        ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Archive, StageStatus::Success, fields, None)?;
        return Ok(Some(existing.doc_id));
    }

    if let Some(existing) = ashare_db::queries::find_source_document_by_path(pool, &path.to_string_lossy()).await? {
        if existing.file_hash != current_hash {
            ashare_checkpoint::update_stage(
                checkpoints_dir,
                checkpoint,
                StageName::Archive,
                StageStatus::Skipped,
                serde_json::Map::new(),
                Some("file_path_hash_mismatch".to_string()),
            )?;
            return Ok(None);
        }
    }

    let doc_date = paths::derive_doc_date(path, doc_type);
    let report_title = paths::derive_report_title(&extraction.extraction_data, path);
    let company_code = extraction.extraction_data.company_code.clone().unwrap_or_default();
    let original_content = ashare_fingerprint::read_text_with_fallback(path).ok().map(|(t, _)| t);
    let raw_llm_output = serde_json::to_value(extraction)?;

    let result = ashare_archive::save(
        pool,
        doc_type,
        &company_code,
        doc_date,
        &report_title,
        &path.to_string_lossy(),
        &current_hash,
        &raw_llm_output,
        &extraction.extraction_metadata,
        original_content.as_deref(),
        &extraction.extraction_data,
    )
    .await;

    match result {
        Ok(doc_id) => {
            let mut fields = serde_json::Map::new();
            fields.insert("doc_id".to_string(), serde_json::Value::String(doc_id.to_string()));
            ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Archive, StageStatus::Success, fields, None)?;
            Ok(Some(doc_id))
        }
        Err(Error::DuplicateFileHash { .. }) => {
            // Another worker archived the same content between our lookup
            // and insert; treat it as already-done rather than a failure.
            if let Some(existing) = ashare_db::queries::find_source_document_by_hash(pool, &current_hash).await? {
                let mut fields = serde_json::Map::new();
                fields.insert("doc_id".to_string(), serde_json::Value::String(existing.doc_id.to_string()));
                ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Archive, StageStatus::Success, fields, None)?;
                Ok(Some(existing.doc_id))
            } else {
                Ok(None)
            }
        }
        Err(e) => {
            ashare_checkpoint::update_stage(
                checkpoints_dir,
                checkpoint,
                StageName::Archive,
                StageStatus::Failed,
                serde_json::Map::new(),
                Some(e.error_type().to_string()),
            )?;
            Err(e)
        }
    }
}

async fn stage_fuse(
    cfg: &Config,
    pool: &PgPool,
    company_code: &str,
    doc_id: Uuid,
    extraction: &ExtractionResult,
    checkpoints_dir: &Path,
    checkpoint: &mut CheckpointRecord,
) -> (u32, u32) {
    let span = tracing::info_span!("stage", stage = "fusion", company_code = %company_code, doc_id = %doc_id);
    let _enter = span.enter();

    if checkpoint.is_success(StageName::Fusion) {
        return (0, 0);
    }

    let concepts = &extraction.extraction_data.business_concepts;
    let outcome = ashare_fusion::fuse_concepts(pool, company_code, doc_id, concepts, cfg.max_source_sentences).await;

    match outcome {
        Ok(outcome) => {
            let mut fields = serde_json::Map::new();
            fields.insert("created".to_string(), outcome.counts.created.into());
            fields.insert("updated".to_string(), outcome.counts.updated.into());
            fields.insert("skipped".to_string(), outcome.counts.skipped.into());
            fields.insert("total".to_string(), outcome.counts.total.into());

            let (status, reason) = match &outcome.failure {
                None => (StageStatus::Success, None),
                Some(ashare_fusion::FusionFailure::NoBusinessConcepts) => {
                    (StageStatus::Skipped, Some("no_business_concepts".to_string()))
                }
                Some(ashare_fusion::FusionFailure::OptimisticLockConflict { concept_name }) => {
                    (StageStatus::Failed, Some(format!("optimistic_lock_conflict:{concept_name}")))
                }
                Some(ashare_fusion::FusionFailure::InvalidCategory { concept_name }) => {
                    (StageStatus::Failed, Some(format!("invalid_category:{concept_name}")))
                }
            };
            let _ = ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Fusion, status, fields, reason);
            (outcome.counts.created, outcome.counts.updated)
        }
        Err(e) => {
            let _ = ashare_checkpoint::update_stage(
                checkpoints_dir,
                checkpoint,
                StageName::Fusion,
                StageStatus::Failed,
                serde_json::Map::new(),
                Some(e.error_type().to_string()),
            );
            (0, 0)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn stage_vectorize(
    cfg: &Config,
    pool: &PgPool,
    embedder: &dyn EmbeddingAdapter,
    metrics: &MetricsRegistry,
    company_code: &str,
    checkpoints_dir: &Path,
    checkpoint: &mut CheckpointRecord,
    cancel: &CancellationToken,
) -> Result<u32> {
    let span = tracing::info_span!("stage", stage = "vectorization", company_code = %company_code);
    let _enter = span.enter();

    if checkpoint.is_success(StageName::Vectorization) {
        return Ok(0);
    }

    let result = tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        r = ashare_vectorize::vectorize_company(
            pool,
            embedder,
            company_code,
            false,
            cfg.embedding_batch_size,
            cfg.max_text_length,
            cfg.embedding_timeout(),
        ) => r,
    };

    match result {
        Ok(counts) => {
            for _ in 0..counts.dimension_errors {
                metrics.record_dimension_error();
            }
            let mut fields = serde_json::Map::new();
            fields.insert("embedded".to_string(), counts.embedded.into());
            fields.insert("dimension_errors".to_string(), counts.dimension_errors.into());
            fields.insert("total".to_string(), counts.total.into());
            let _ = ashare_checkpoint::update_stage(checkpoints_dir, checkpoint, StageName::Vectorization, StageStatus::Success, fields, None);
            Ok(counts.embedded)
        }
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            let _ = ashare_checkpoint::update_stage(
                checkpoints_dir,
                checkpoint,
                StageName::Vectorization,
                StageStatus::Failed,
                serde_json::Map::new(),
                Some(e.error_type().to_string()),
            );
            Ok(0)
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
