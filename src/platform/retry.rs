//! Rate-limit aware retry with a shared suspension gate.
//!
//! Every outbound call of one client goes through [`RetryPolicy::run`].
//! When a call reports a rate limit, the gate is closed until the cool-off
//! elapses, so no other call of that client is sent meanwhile. Other
//! errors are returned immediately.

use parking_lot::Mutex;
use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;

/// Upper bound for a single gate suspension.
const MAX_SUSPEND: Duration = Duration::from_secs(24 * 60 * 60);

/// Cool-off suggested by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHint {
    pub retry_after: Option<Duration>,
    pub global: bool,
}

/// Parse a `Retry-After` value in seconds. Negative, non-finite and
/// out-of-range values are dropped.
pub fn parse_retry_after(raw: f64) -> Option<Duration> {
    if raw < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(raw).ok()
}

/// Errors that may carry a rate-limit signal.
pub trait RateLimitSignal {
    fn rate_limit(&self) -> Option<RateLimitHint>;
}

/// Deadline before which no call may be sent.
#[derive(Debug, Default)]
pub struct SuspendGate {
    until: Mutex<Option<Instant>>,
}

impl SuspendGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate for `delay`. An existing later deadline is kept.
    pub fn suspend(&self, delay: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now + MAX_SUSPEND);
        let mut until = self.until.lock();
        if (*until).is_none_or(|current| current < deadline) {
            *until = Some(deadline);
        }
    }

    pub fn remaining(&self) -> Duration {
        let until = *self.until.lock();
        until
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Wait until the gate is open.
    pub async fn wait(&self) {
        loop {
            let deadline = *self.until.lock();
            match deadline {
                Some(d) if d > Instant::now() => tokio::time::sleep_until(d).await,
                _ => return,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub default_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            default_delay: Duration::from_millis(cfg.default_delay_ms),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            max_jitter: Duration::from_millis(cfg.max_jitter_ms),
        }
    }

    /// Cool-off before retry number `attempt` (zero-based), without jitter.
    /// The server's suggestion wins; otherwise the default doubles per attempt.
    pub fn base_delay(&self, attempt: u32, hint: &RateLimitHint) -> Duration {
        let delay = match hint.retry_after {
            Some(d) => d,
            None => self
                .default_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16))),
        };
        delay.min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32, hint: &RateLimitHint) -> Duration {
        let base = self.base_delay(attempt, hint);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Run `operation`, retrying rate-limited attempts at most
    /// `max_retries` times. The final rate-limit error is returned as is.
    pub async fn run<F, Fut, T, E>(
        &self,
        gate: &SuspendGate,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal + std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            gate.wait().await;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            "Operation succeeded after rate-limit retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let Some(hint) = err.rate_limit() else {
                return Err(err);
            };
            if attempt >= self.max_retries {
                tracing::error!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    error = %err,
                    "Rate limit persisted, giving up"
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt, &hint);
            tracing::warn!(
                operation = operation_name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                global = hint.global,
                "Rate limited, suspending sends"
            );
            gate.suspend(delay);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Limited(Option<Duration>),
        Broken,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl RateLimitSignal for TestError {
        fn rate_limit(&self) -> Option<RateLimitHint> {
            match self {
                Self::Limited(d) => Some(RateLimitHint {
                    retry_after: *d,
                    global: false,
                }),
                Self::Broken => None,
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            default_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(600),
            max_jitter: Duration::from_millis(250),
        }
    }

    #[test]
    fn delay_respects_hint_cap_and_jitter() {
        let p = policy();
        let hint = RateLimitHint {
            retry_after: Some(Duration::from_secs(2)),
            global: true,
        };
        let d = p.delay_for(0, &hint);
        assert!(d >= Duration::from_secs(2) && d <= Duration::from_millis(2250));

        let huge = RateLimitHint {
            retry_after: Some(Duration::from_secs(3600)),
            global: true,
        };
        assert_eq!(p.base_delay(0, &huge), Duration::from_secs(600));
    }

    #[test]
    fn default_delay_doubles_without_hint() {
        let p = policy();
        let none = RateLimitHint {
            retry_after: None,
            global: false,
        };
        assert_eq!(p.base_delay(0, &none), Duration::from_secs(5));
        assert_eq!(p.base_delay(1, &none), Duration::from_secs(10));
        assert_eq!(p.base_delay(10, &none), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn no_call_is_sent_before_the_cool_off() {
        let calls = Arc::new(AtomicU32::new(0));
        let times = Arc::new(Mutex::new(Vec::new()));
        let gate = SuspendGate::new();

        let result: Result<u32, TestError> = policy()
            .run(&gate, "send", || {
                let calls = calls.clone();
                let times = times.clone();
                async move {
                    times.lock().push(Instant::now());
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::Limited(Some(Duration::from_secs(5))))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        let times = times.lock();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let gate = SuspendGate::new();
        let result: Result<(), TestError> = policy()
            .run(&gate, "send", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Limited(None))
                }
            })
            .await;
        assert!(matches!(result, Err(TestError::Limited(_))));
        // One initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let gate = SuspendGate::new();
        let result: Result<(), TestError> = policy()
            .run(&gate, "send", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Broken) }
            })
            .await;
        assert!(matches!(result, Err(TestError::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_after_rejects_unrepresentable_values() {
        assert_eq!(parse_retry_after(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after(0.0), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(-1.0), None);
        assert_eq!(parse_retry_after(f64::NAN), None);
        assert_eq!(parse_retry_after(f64::INFINITY), None);
        assert_eq!(parse_retry_after(1e20), None);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_blocks_other_callers() {
        let gate = SuspendGate::new();
        gate.suspend(Duration::from_secs(3));
        let start = Instant::now();
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(gate.remaining(), Duration::ZERO);
    }
}
