//! End-to-end scenarios against a real Postgres instance. These require
//! `ASHARE_DATABASE_URL` to point at a database with the migrations
//! applied and are skipped otherwise, following this codebase's pattern
//! of `#[ignore]`-gating tests that need live infrastructure.

use std::sync::Arc;

use ashare_adapters::embed::fake::FakeEmbeddingAdapter;
use ashare_adapters::llm::fake::FakeLlmExtractor;
use ashare_adapters::llm::{ExtractedConcept, ExtractionData, ExtractionResult};
use ashare_core::config::Config;
use ashare_core::metrics::MetricsRegistry;
use ashare_pipeline::Orchestrator;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("ASHARE_DATABASE_URL").ok()?;
    sqlx::PgPool::connect(&url).await.ok()
}

fn sample_concept(name: &str) -> ExtractedConcept {
    ExtractedConcept {
        concept_name: name.to_string(),
        concept_category: "核心业务".to_string(),
        importance_score: 0.8,
        development_stage: "成长期".to_string(),
        description: "公司的核心业务板块".to_string(),
        metrics: serde_json::json!({}),
        timeline: serde_json::json!({}),
        customers: vec!["客户A".to_string()],
        partners: vec![],
        subsidiaries_or_investees: vec![],
        source_sentences: vec!["这是一个来源句子".to_string()],
    }
}

fn sample_extraction(company_code: &str) -> ExtractionResult {
    ExtractionResult {
        document_type: "annual_report".to_string(),
        extraction_data: ExtractionData {
            company_code: Some(company_code.to_string()),
            company_name_full: Some("测试股份有限公司".to_string()),
            company_name_short: Some("测试股份".to_string()),
            exchange: Some("SZSE".to_string()),
            report_title: Some("2024年年度报告".to_string()),
            business_concepts: vec![sample_concept("智能制造")],
            extra: serde_json::Map::new(),
        },
        extraction_metadata: serde_json::json!({}),
    }
}

#[tokio::test]
#[ignore = "requires a live ASHARE_DATABASE_URL Postgres instance with migrations applied"]
async fn happy_path_processes_a_single_annual_report_end_to_end() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let annual_dir = dir.path().join("annual_reports");
    std::fs::create_dir_all(&annual_dir).unwrap();
    let report_path = annual_dir.join("300257_2024_annual_report.md");
    std::fs::write(&report_path, "股票代码：300257\n开山股份年度报告正文").unwrap();

    let mut cfg = Config::default();
    cfg.annual_reports_dir = annual_dir;
    cfg.research_reports_dir = dir.path().join("research_reports");
    cfg.extracted_dir = dir.path().join("extracted");
    cfg.checkpoints_dir = dir.path().join("checkpoints");
    cfg.locks_dir = dir.path().join("locks");

    let report = ashare_pipeline::analyze(&cfg, &pool).await.unwrap();
    assert_eq!(report.work_items.len(), 1);

    let llm = Arc::new(FakeLlmExtractor::new(vec![sample_extraction("300257")]));
    let embedder = Arc::new(FakeEmbeddingAdapter::new(cfg.embedding_dimension, cfg.embedding_batch_size));

    let orchestrator = Orchestrator {
        cfg,
        pool,
        llm,
        embedder,
        metrics: Arc::new(MetricsRegistry::new()),
    };

    let summary = orchestrator.run(report.work_items, CancellationToken::new()).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.concepts_created, 1);
}

#[tokio::test]
#[ignore = "requires a live ASHARE_DATABASE_URL Postgres instance with migrations applied"]
async fn dimension_drift_is_dropped_without_failing_the_batch() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let annual_dir = dir.path().join("annual_reports");
    std::fs::create_dir_all(&annual_dir).unwrap();
    let report_path = annual_dir.join("300258_2024_annual_report.md");
    std::fs::write(&report_path, "股票代码：300258\n正文").unwrap();

    let mut cfg = Config::default();
    cfg.annual_reports_dir = annual_dir;
    cfg.research_reports_dir = dir.path().join("research_reports");
    cfg.extracted_dir = dir.path().join("extracted");
    cfg.checkpoints_dir = dir.path().join("checkpoints");
    cfg.locks_dir = dir.path().join("locks");

    let report = ashare_pipeline::analyze(&cfg, &pool).await.unwrap();
    let llm = Arc::new(FakeLlmExtractor::new(vec![sample_extraction("300258")]));
    let embedder = Arc::new(FakeEmbeddingAdapter::new(cfg.embedding_dimension, cfg.embedding_batch_size));
    *embedder.wrong_dimension_index.lock().unwrap() = Some((0, 768));

    let orchestrator = Orchestrator {
        cfg,
        pool,
        llm,
        embedder,
        metrics: Arc::new(MetricsRegistry::new()),
    };

    let summary = orchestrator.run(report.work_items, CancellationToken::new()).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.embedded, 0, "the single concept's vector had the wrong dimension and should be dropped");
}

#[tokio::test]
#[ignore = "requires a live ASHARE_DATABASE_URL Postgres instance with migrations applied"]
async fn rerunning_an_unchanged_tree_makes_no_further_llm_calls() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let annual_dir = dir.path().join("annual_reports");
    std::fs::create_dir_all(&annual_dir).unwrap();
    let report_path = annual_dir.join("300261_2024_annual_report.md");
    std::fs::write(&report_path, "股票代码：300261\n正文内容").unwrap();

    let mut cfg = Config::default();
    cfg.annual_reports_dir = annual_dir;
    cfg.research_reports_dir = dir.path().join("research_reports");
    cfg.extracted_dir = dir.path().join("extracted");
    cfg.checkpoints_dir = dir.path().join("checkpoints");
    cfg.locks_dir = dir.path().join("locks");

    let report = ashare_pipeline::analyze(&cfg, &pool).await.unwrap();
    assert_eq!(report.work_items.len(), 1);

    let llm = Arc::new(FakeLlmExtractor::new(vec![sample_extraction("300261")]));
    let embedder = Arc::new(FakeEmbeddingAdapter::new(cfg.embedding_dimension, cfg.embedding_batch_size));

    let orchestrator = Orchestrator {
        cfg: cfg.clone(),
        pool: pool.clone(),
        llm: llm.clone(),
        embedder,
        metrics: Arc::new(MetricsRegistry::new()),
    };
    let summary = orchestrator.run(report.work_items, CancellationToken::new()).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(llm.call_count(), 1);

    let row_before = ashare_db::queries::find_concept_by_name(&pool, "300261", "智能制造")
        .await
        .unwrap()
        .unwrap();

    let rerun_report = ashare_pipeline::analyze(&cfg, &pool).await.unwrap();
    assert!(
        rerun_report.work_items.is_empty(),
        "an unchanged tree must surface nothing left to process"
    );

    let rerun_summary = orchestrator.run(rerun_report.work_items, CancellationToken::new()).await;
    assert_eq!(rerun_summary.processed, 0);
    assert_eq!(llm.call_count(), 1, "re-running an unchanged tree must not place a second LLM call");

    let row_after = ashare_db::queries::find_concept_by_name(&pool, "300261", "智能制造")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row_after.version, row_before.version, "an unchanged re-run must not bump the concept version");
}

#[tokio::test]
#[ignore = "requires a live ASHARE_DATABASE_URL Postgres instance with migrations applied"]
async fn a_second_report_for_an_existing_company_merges_into_the_same_concept() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let annual_dir = dir.path().join("annual_reports");
    let research_dir = dir.path().join("research_reports");
    std::fs::create_dir_all(&annual_dir).unwrap();
    std::fs::create_dir_all(&research_dir).unwrap();

    let mut cfg = Config::default();
    cfg.annual_reports_dir = annual_dir.clone();
    cfg.research_reports_dir = research_dir.clone();
    cfg.extracted_dir = dir.path().join("extracted");
    cfg.checkpoints_dir = dir.path().join("checkpoints");
    cfg.locks_dir = dir.path().join("locks");

    // First document: the annual report that creates the company and the
    // concept at version 1.
    let annual_path = annual_dir.join("300262_2024_annual_report.md");
    std::fs::write(&annual_path, "股票代码：300262\n正文内容").unwrap();
    let first_report = ashare_pipeline::analyze(&cfg, &pool).await.unwrap();
    assert_eq!(first_report.work_items.len(), 1);

    let first_llm = Arc::new(FakeLlmExtractor::new(vec![sample_extraction("300262")]));
    let first_orchestrator = Orchestrator {
        cfg: cfg.clone(),
        pool: pool.clone(),
        llm: first_llm,
        embedder: Arc::new(FakeEmbeddingAdapter::new(cfg.embedding_dimension, cfg.embedding_batch_size)),
        metrics: Arc::new(MetricsRegistry::new()),
    };
    let first_summary = first_orchestrator.run(first_report.work_items, CancellationToken::new()).await;
    assert_eq!(first_summary.concepts_created, 1);

    // Second document: a research report for the same company naming the
    // same concept with a longer description, which the fusion engine must
    // merge into the existing row rather than create a sibling.
    let research_path = research_dir.join("300262_broker_note.md");
    std::fs::write(&research_path, "股票代码：300262\n研究报告正文").unwrap();
    let second_report = ashare_pipeline::analyze(&cfg, &pool).await.unwrap();
    assert_eq!(second_report.work_items.len(), 1);

    let mut second_extraction = sample_extraction("300262");
    second_extraction.document_type = "research_report".to_string();
    second_extraction.extraction_data.business_concepts[0].description =
        "公司的核心业务板块，本次研究报告补充了更详尽的描述信息".to_string();

    let second_llm = Arc::new(FakeLlmExtractor::new(vec![second_extraction]));
    let second_orchestrator = Orchestrator {
        cfg: cfg.clone(),
        pool: pool.clone(),
        llm: second_llm,
        embedder: Arc::new(FakeEmbeddingAdapter::new(cfg.embedding_dimension, cfg.embedding_batch_size)),
        metrics: Arc::new(MetricsRegistry::new()),
    };
    let second_summary = second_orchestrator.run(second_report.work_items, CancellationToken::new()).await;
    assert_eq!(second_summary.concepts_created, 0);
    assert_eq!(second_summary.concepts_updated, 1);

    let row = ashare_db::queries::find_concept_by_name(&pool, "300262", "智能制造")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.version, 2);
}

#[tokio::test]
#[ignore = "requires a live ASHARE_DATABASE_URL Postgres instance with migrations applied"]
async fn a_research_report_for_an_unknown_company_fails_archival_without_running_later_stages() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let research_dir = dir.path().join("research_reports");
    std::fs::create_dir_all(&research_dir).unwrap();
    let report_path = research_dir.join("999999_broker_note.md");
    std::fs::write(&report_path, "股票代码：999999\n研究报告正文").unwrap();

    let mut cfg = Config::default();
    cfg.annual_reports_dir = dir.path().join("annual_reports");
    cfg.research_reports_dir = research_dir;
    cfg.extracted_dir = dir.path().join("extracted");
    cfg.checkpoints_dir = dir.path().join("checkpoints");
    cfg.locks_dir = dir.path().join("locks");

    let report = ashare_pipeline::analyze(&cfg, &pool).await.unwrap();
    assert_eq!(report.work_items.len(), 1);

    let mut extraction = sample_extraction("999999");
    extraction.document_type = "research_report".to_string();
    let llm = Arc::new(FakeLlmExtractor::new(vec![extraction]));
    let embedder = Arc::new(FakeEmbeddingAdapter::new(cfg.embedding_dimension, cfg.embedding_batch_size));
    let orchestrator = Orchestrator {
        cfg,
        pool: pool.clone(),
        llm: llm.clone(),
        embedder,
        metrics: Arc::new(MetricsRegistry::new()),
    };

    let summary = orchestrator.run(report.work_items, CancellationToken::new()).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(llm.call_count(), 1, "extraction runs before the archive stage rejects the unknown company");
    assert_eq!(summary.concepts_created, 0);
    assert_eq!(summary.concepts_updated, 0);

    let archived = ashare_db::queries::find_source_document_by_path(&pool, &report_path.to_string_lossy())
        .await
        .unwrap();
    assert!(archived.is_none(), "an archive failure must leave no source_documents row behind");
}

#[tokio::test]
#[ignore = "requires a live ASHARE_DATABASE_URL Postgres instance with migrations applied"]
async fn a_losing_writer_in_a_concurrent_fusion_reports_an_optimistic_lock_conflict() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let company_code = "300263";
    ashare_db::queries::insert_company(&pool, company_code, "测试股份有限公司", "测试股份", "SZSE")
        .await
        .unwrap();
    let doc_id = ashare_db::queries::insert_source_document(
        &pool,
        company_code,
        "annual_report",
        chrono::Utc::now().date_naive(),
        "2024年年度报告",
        "300263_2024_annual_report.md",
        "deadbeef",
        &serde_json::json!({}),
        &serde_json::json!({}),
        None,
    )
    .await
    .unwrap();

    let outcome = ashare_fusion::fuse_concepts(&pool, company_code, doc_id, &[sample_concept("智能制造")], 20)
        .await
        .unwrap();
    assert_eq!(outcome.counts.created, 1);

    let row = ashare_db::queries::find_concept_by_name(&pool, company_code, "智能制造")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.version, 1);

    // Two writers that both read the row at version 1 before either commits
    // race to apply their update; the optimistic-lock predicate lets exactly
    // one of them through.
    let first_applied = ashare_db::queries::update_concept_fusion(
        &pool,
        row.concept_id,
        row.version,
        row.importance_score,
        &row.development_stage,
        &row.concept_details,
        doc_id,
    )
    .await
    .unwrap();
    assert!(first_applied);

    let second_applied = ashare_db::queries::update_concept_fusion(
        &pool,
        row.concept_id,
        row.version,
        row.importance_score,
        &row.development_stage,
        &row.concept_details,
        doc_id,
    )
    .await
    .unwrap();
    assert!(!second_applied, "a writer holding the pre-race version must lose the optimistic-lock race");

    let final_row = ashare_db::queries::find_concept_by_name(&pool, company_code, "智能制造")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(final_row.version, 2, "exactly one of the two racing writers' updates must have applied");
}
