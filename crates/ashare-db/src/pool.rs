//! Postgres connection pool wrapper: auto-sized bounds, a command timeout,
//! and a periodic stats sampler feeding the metrics registry. Modeled on
//! this codebase's `DbPoolConfig`/`auto_pool_size()`/`DbPoolStatsSampler`
//! pattern, adapted from a single-file SQLite pool to `sqlx::PgPool`.

use std::sync::Arc;
use std::time::Duration;

use ashare_core::config::Config;
use ashare_core::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Derives a pool size bound from available CPU parallelism, clamped to a
/// floor/ceiling — the same shape as this codebase's `auto_pool_size`,
/// minus the two-tier min/max split since Postgres (unlike the teacher's
/// SQLite layer) has no single-writer constraint to protect against.
#[must_use]
pub fn auto_pool_size(floor: u32, ceiling: u32) -> u32 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4);
    (cpus * 4).clamp(floor, ceiling)
}

/// Builds a `sqlx::PgPool` from [`Config`], applying pool bounds (using the
/// configured values, or an auto-sized default when the configured max is
/// zero) and a connect/acquire timeout.
pub async fn build_pool(cfg: &Config) -> Result<PgPool> {
    let max_size = if cfg.db_pool_max_size == 0 {
        auto_pool_size(10, 50)
    } else {
        cfg.db_pool_max_size
    };
    let pool = PgPoolOptions::new()
        .min_connections(cfg.db_pool_min_size)
        .max_connections(max_size)
        .acquire_timeout(Duration::from_secs(cfg.db_pool_timeout_secs))
        .connect(&cfg.database_url)
        .await?;

    if cfg.auto_migrate {
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    Ok(pool)
}

/// Periodically samples pool utilization (`size`, `num_idle`) into the
/// metrics registry's queue-depth gauge, following this codebase's
/// `DbPoolStatsSampler` cadence idiom. Returns a handle whose `abort()`
/// stops sampling; dropping the handle does not stop the task (same
/// fire-and-forget shape as the teacher's sampler).
pub fn spawn_stats_sampler(
    pool: PgPool,
    metrics: Arc<ashare_core::MetricsRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let in_use = pool.size().saturating_sub(pool.num_idle() as u32);
            metrics.set_queue_depth(u64::from(in_use));
        }
    })
}
