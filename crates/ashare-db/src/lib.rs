#![forbid(unsafe_code)]
//! Postgres-backed store access: pool construction, migrations, and the
//! query functions used by the archive writer, fusion engine, and vector
//! index builder.

pub mod pool;
pub mod queries;

pub use pool::{auto_pool_size, build_pool, spawn_stats_sampler};
