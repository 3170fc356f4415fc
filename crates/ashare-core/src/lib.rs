#![forbid(unsafe_code)]
//! Shared types for the pipeline: the error taxonomy, configuration,
//! data model, metrics registry, and logging bootstrap.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;

pub use config::{global_config, Config};
pub use error::{Error, ErrorCategory, Result};
pub use metrics::{global_metrics, MetricsRegistry};
