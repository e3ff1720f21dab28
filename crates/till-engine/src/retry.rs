//! # Retry / Concurrency Controller
//!
//! One retry-with-backoff combinator for every lock-contended operation.
//!
//! ## Backoff
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Jittered Exponential Backoff                          │
//! │                                                                         │
//! │  delay(n) = min(base × 2^n, max) × (1 + U(0, jitter))                  │
//! │                                                                         │
//! │  base = 50ms, max = 2s, jitter = 0.2, max_attempts = 3                 │
//! │                                                                         │
//! │  attempt 1 ── BUSY ──► sleep  50..60ms                                 │
//! │  attempt 2 ── BUSY ──► sleep 100..120ms                                │
//! │  attempt 3 ── BUSY ──► RetryExhausted { attempts: 3 }                  │
//! │                                                                         │
//! │  Any non-transient error is returned at once, without sleeping.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every attempt is a whole locked transaction: a failed attempt has rolled
//! back before the next one starts, so nothing is ever half-applied.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Jittered exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the multiplicative jitter, in `[0, 1]`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Creates a policy, clamping nonsensical inputs.
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        RetryPolicy::new(1, 1, 1, 0.0)
    }

    /// Capped exponential delay before retry `n` (0-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = 2_u64.saturating_pow(retry);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay before retry `n` (0-based), with jitter applied.
    pub fn next_delay(&self, retry: u32) -> Duration {
        let delay = self.base_delay(retry);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.mul_f64(factor)
    }

    /// Runs `op`, retrying while it fails with a transient error.
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> EngineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        with_retry(self, operation, EngineError::is_transient, op).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, 50, 2_000, 0.2)
    }
}

/// Runs `op` under `policy`, retrying the errors `is_transient` accepts.
///
/// ## Errors
/// - the first non-transient error, unchanged
/// - `RetryExhausted` wrapping the last transient error once
///   `policy.max_attempts` attempts have failed
pub async fn with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_transient: P,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
    P: Fn(&EngineError) -> bool,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "Retries exhausted");
                    return Err(EngineError::RetryExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                let delay = policy.next_delay(attempt - 1);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient contention, retrying"
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn busy() -> EngineError {
        EngineError::TransientContention("database is locked".into())
    }

    #[test]
    fn test_new_clamps_inputs() {
        let policy = RetryPolicy::new(0, 0, 0, 3.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter, 1.0);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(6, 100, 500, 0.0);
        let delays: Vec<u128> = (0..5).map(|n| policy.next_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy::new(3, 100, 1_000, 0.2);
        for _ in 0..200 {
            let d = policy.next_delay(1).as_millis();
            assert!((200..=240).contains(&d), "delay {} out of bounds", d);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let policy = RetryPolicy::new(3, 10, 100, 0.0);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = policy
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(busy())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 10ms + 20ms of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let policy = RetryPolicy::new(3, 5, 5, 0.0);
        let calls = AtomicU32::new(0);

        let result: EngineResult<()> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(busy()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(EngineError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_errors_propagate_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: EngineResult<()> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::NoOpenSession) }
            })
            .await;

        assert!(matches!(result, Err(EngineError::NoOpenSession)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let policy = RetryPolicy::new(2, 1, 1, 0.0);
        let calls = AtomicU32::new(0);

        // Conflicts are normally final; a caller may choose otherwise.
        let result: EngineResult<()> = with_retry(
            &policy,
            "test",
            |e| matches!(e, EngineError::Conflict(_)),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Conflict("dup".into())) }
            },
        )
        .await;

        assert!(matches!(result, Err(EngineError::RetryExhausted { attempts: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_policy_gives_up_after_one_attempt() {
        let result: EngineResult<()> = RetryPolicy::no_retry().run("test", |_| async { Err(busy()) }).await;
        assert!(matches!(result, Err(EngineError::RetryExhausted { attempts: 1, .. })));
    }
}
