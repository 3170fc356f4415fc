//! Destructive/bulk operations gated behind explicit CLI flags: clearing
//! the store, clearing checkpoints, and a full embedding rebuild.

use std::path::Path;

use ashare_adapters::embed::EmbeddingAdapter;
use ashare_core::config::Config;
use ashare_core::error::Result;
use sqlx::PgPool;

/// Truncates every pipeline-owned table, cascading through the foreign
/// keys from `companies` down to `business_concepts_master`.
pub async fn clear_database(pool: &PgPool) -> Result<()> {
    sqlx::query("TRUNCATE TABLE business_concepts_master, source_documents, companies CASCADE")
        .execute(pool)
        .await?;
    Ok(())
}

/// Removes every checkpoint file under `checkpoints_dir`, leaving the
/// directory itself in place.
pub fn clear_checkpoints(checkpoints_dir: &Path) -> std::io::Result<()> {
    if !checkpoints_dir.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(checkpoints_dir) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Re-embeds every active concept for every known company, regardless of
/// whether it already carries a vector.
pub async fn rebuild_all_indices(pool: &PgPool, embedder: &dyn EmbeddingAdapter, cfg: &Config) -> Result<u32> {
    let companies = ashare_db::queries::existing_company_codes(pool).await?;
    let mut embedded = 0;
    for company_code in companies {
        let counts = ashare_vectorize::vectorize_company(
            pool,
            embedder,
            &company_code,
            true,
            cfg.embedding_batch_size,
            cfg.max_text_length,
            cfg.embedding_timeout(),
        )
        .await?;
        embedded += counts.embedded;
    }
    Ok(embedded)
}
