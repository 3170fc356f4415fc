//! Exponential-backoff retry and a circuit breaker for the
//! Transient-external error category, following this codebase's
//! `CircuitBreaker` (`Closed`/`Open`/`HalfOpen`, atomics-based) shape,
//! adjusted to the constants named in the error-handling design
//! (attempts=3, base=1s, max=10s).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use ashare_core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Guards repeated calls to a single adapter instance against a persistent
/// run of failures, short-circuiting once `threshold` consecutive failures
/// are observed until `reset_duration` elapses, at which point one
/// half-open probe is allowed through.
pub struct CircuitBreaker {
    threshold: u32,
    reset_duration: Duration,
    consecutive_failures: AtomicU32,
    opened_at_epoch_ms: AtomicU64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, reset_duration: Duration) -> Self {
        Self {
            threshold,
            reset_duration,
            consecutive_failures: AtomicU32::new(0),
            opened_at_epoch_ms: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at_epoch_ms.load(Ordering::Acquire);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        let elapsed_ms = now_epoch_ms().saturating_sub(opened_at);
        if elapsed_ms >= self.reset_duration.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Call before attempting the external operation.
    pub fn check(&self, adapter_name: &str) -> Result<()> {
        if self.state() == CircuitState::Open {
            return Err(Error::CircuitOpen {
                adapter: adapter_name.to_string(),
            });
        }
        Ok(())
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_epoch_ms.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold {
            self.opened_at_epoch_ms
                .store(now_epoch_ms(), Ordering::Release);
        }
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Computes `delay = min(max_delay, base * 2^attempt)` with up to ±25%
/// jitter, matching this codebase's documented backoff schedule shape.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter_fraction: f64) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(max.as_millis());
    let jitter_span = (capped as f64 * jitter_fraction) as i64;
    let jitter = if jitter_span > 0 {
        (pseudo_random(attempt) % (2 * jitter_span as u64)) as i64 - jitter_span
    } else {
        0
    };
    let with_jitter = (capped as i64 + jitter).max(0) as u64;
    Duration::from_millis(with_jitter)
}

/// A tiny deterministic hash-based jitter source; retry timing does not
/// need cryptographic randomness, only enough spread to avoid synchronized
/// retries across concurrent workers.
fn pseudo_random(seed: u32) -> u64 {
    let mut x = u64::from(seed) ^ 0x9E37_79B9_7F4A_7C15;
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    x
}

/// Runs `op` up to `max_attempts` times, sleeping with [`backoff_delay`]
/// between attempts, as long as the returned error is recoverable. Used by
/// adapter call sites so the pipeline orchestrator only ever observes a
/// stage's final outcome.
pub async fn retry_with_backoff<F, Fut, T>(
    max_attempts: u32,
    base: Duration,
    max: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_recoverable() && attempt + 1 < max_attempts => {
                tokio::time::sleep(backoff_delay(attempt, base, max, 0.25)).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Internal("retry loop exited without a result".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(10_000);
        let d0 = backoff_delay(0, base, max, 0.0);
        let d3 = backoff_delay(3, base, max, 0.0);
        let d10 = backoff_delay(10, base, max, 0.0);
        assert_eq!(d0, Duration::from_millis(1000));
        assert_eq!(d3, Duration::from_millis(8000));
        assert_eq!(d10, max);
    }

    #[test]
    fn circuit_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_the_breaker() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn retry_with_backoff_gives_up_after_max_attempts() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
            |_attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::TransientExternal {
                        message: "boom".into(),
                    })
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
