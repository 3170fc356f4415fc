//! Process-wide metrics registry: counters, histograms, and a queue-depth
//! gauge. Modeled on this codebase's `global_metrics()` accessor pattern —
//! a single process-wide registry reachable without threading a handle
//! through every call site, because observations are purely additive and
//! never participate in control flow.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::models::StageName;

#[derive(Debug, Default)]
struct StageCounters {
    success: u64,
    failed: u64,
    skipped: u64,
    duration_ms_total: u64,
    duration_samples: u64,
}

/// Additive counters and histograms for the whole run. Never returns an
/// error: emission failures must not fail the surrounding stage.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    stage_counters: Mutex<HashMap<StageName, StageCounters>>,
    dimension_errors: Mutex<u64>,
    lock_skipped: Mutex<u64>,
    llm_calls_skipped: Mutex<u64>,
    queue_depth: Mutex<u64>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stage_success(&self, stage: StageName, duration_ms: u64) {
        let mut map = self.stage_counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(stage).or_default();
        entry.success += 1;
        entry.duration_ms_total += duration_ms;
        entry.duration_samples += 1;
    }

    pub fn record_stage_failed(&self, stage: StageName, duration_ms: u64) {
        let mut map = self.stage_counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(stage).or_default();
        entry.failed += 1;
        entry.duration_ms_total += duration_ms;
        entry.duration_samples += 1;
    }

    pub fn record_stage_skipped(&self, stage: StageName, duration_ms: u64) {
        let mut map = self.stage_counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(stage).or_default();
        entry.skipped += 1;
        entry.duration_ms_total += duration_ms;
        entry.duration_samples += 1;
    }

    pub fn record_dimension_error(&self) {
        *self.dimension_errors.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    pub fn record_lock_skipped(&self) {
        *self.lock_skipped.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    pub fn record_llm_call_skipped(&self) {
        *self.llm_calls_skipped.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    pub fn set_queue_depth(&self, depth: u64) {
        *self.queue_depth.lock().unwrap_or_else(|e| e.into_inner()) = depth;
    }

    #[must_use]
    pub fn queue_depth(&self) -> u64 {
        *self.queue_depth.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn stage_success_count(&self, stage: StageName) -> u64 {
        self.stage_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&stage)
            .map_or(0, |c| c.success)
    }

    #[must_use]
    pub fn stage_failed_count(&self, stage: StageName) -> u64 {
        self.stage_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&stage)
            .map_or(0, |c| c.failed)
    }

    #[must_use]
    pub fn dimension_error_count(&self) -> u64 {
        *self.dimension_errors.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn lock_skipped_count(&self) -> u64 {
        *self.lock_skipped.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn llm_calls_skipped_count(&self) -> u64 {
        *self.llm_calls_skipped.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn mean_duration_ms(&self, stage: StageName) -> Option<f64> {
        let map = self.stage_counters.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&stage).and_then(|c| {
            if c.duration_samples == 0 {
                None
            } else {
                Some(c.duration_ms_total as f64 / c.duration_samples as f64)
            }
        })
    }
}

static METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// The process-wide metrics registry, created on first access.
pub fn global_metrics() -> &'static MetricsRegistry {
    METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently_per_stage() {
        let registry = MetricsRegistry::new();
        registry.record_stage_success(StageName::Extraction, 10);
        registry.record_stage_success(StageName::Extraction, 20);
        registry.record_stage_failed(StageName::Fusion, 5);

        assert_eq!(registry.stage_success_count(StageName::Extraction), 2);
        assert_eq!(registry.stage_failed_count(StageName::Fusion), 1);
        assert_eq!(registry.stage_success_count(StageName::Fusion), 0);
        assert_eq!(
            registry.mean_duration_ms(StageName::Extraction),
            Some(15.0)
        );
    }

    #[test]
    fn dimension_errors_and_lock_skips_accumulate() {
        let registry = MetricsRegistry::new();
        registry.record_dimension_error();
        registry.record_dimension_error();
        registry.record_lock_skipped();
        assert_eq!(registry.dimension_error_count(), 2);
        assert_eq!(registry.lock_skipped_count(), 1);
    }
}
