//! Exponential backoff with jitter around fallible async operations
//!
//! [`RetryExecutor`] holds only its [`RetrySpec`]; every call to
//! [`RetryExecutor::execute`] keeps its attempt counter on the stack, so one
//! executor can be shared by concurrent callers.

use crate::error::{PusherError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Error substrings that mark a failure as transient
pub const NETWORK_RETRYABLE_PATTERNS: [&str; 9] = [
    "connection refused",
    "timeout",
    "network",
    "temporary failure",
    "503",
    "502",
    "504",
    "EOF",
    "broken pipe",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySpec {
    /// `None` retries until success or cancellation
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction in `[0, 1]` of the delay that is randomly added or removed
    pub jitter: f64,
    /// Empty means every error is retryable
    pub retryable_patterns: Vec<String>,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self::infinite()
    }
}

impl RetrySpec {
    /// Unbounded retries with slow growth, used for whole-disk uploads.
    pub fn infinite() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            backoff_factor: 1.5,
            jitter: 0.2,
            retryable_patterns: NETWORK_RETRYABLE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Faster schedule for short control-plane requests.
    pub fn network() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.3,
            ..Self::infinite()
        }
    }

    /// `0` maps to unbounded, matching the command-line convention.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 { None } else { Some(max_attempts) };
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PusherError::Config(format!(
                "jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(PusherError::Config(format!(
                "backoff factor must be at least 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(PusherError::Config(
                "max delay must not be shorter than base delay".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(PusherError::Config(
                "max attempts must be positive; use None for unbounded".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff before jitter: `min(max_delay, base * factor^(attempt - 1))`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Applies jitter for a sample drawn from `[-1, 1]`. The result stays
    /// within `[0, max_delay]`.
    pub fn apply_jitter(&self, delay: Duration, sample: f64) -> Duration {
        if self.jitter <= 0.0 {
            return delay.min(self.max_delay);
        }
        let secs = delay.as_secs_f64();
        let jittered = secs + secs * self.jitter * sample.clamp(-1.0, 1.0);
        let bounded = jittered.clamp(0.0, self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(bounded).unwrap_or(Duration::ZERO)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.apply_jitter(self.backoff_delay(attempt), sample)
    }

    pub fn is_retryable(&self, error: &PusherError) -> bool {
        if error.is_fatal() || error.is_cancelled() {
            return false;
        }
        if self.retryable_patterns.is_empty() {
            return true;
        }
        let text = error.to_string();
        self.retryable_patterns
            .iter()
            .any(|pattern| text.contains(pattern.as_str()))
    }

    fn ceiling_reached(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }
}

/// Details of one failed attempt, passed to the failure callback before waiting.
#[derive(Debug)]
pub struct AttemptFailure<'a> {
    pub attempt: u32,
    pub error: &'a PusherError,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    spec: RetrySpec,
}

impl RetryExecutor {
    pub fn new(spec: RetrySpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &RetrySpec {
        &self.spec
    }

    /// Runs `operation` until it succeeds, fails terminally, or `cancel` fires.
    ///
    /// The operation receives the 1-based attempt number. Terminal failures come
    /// back as [`PusherError::Exhausted`]; cancellation during a backoff wait (or
    /// before an attempt starts) comes back as [`PusherError::Cancelled`].
    pub async fn execute<T, Op, Fut, OnFailure>(
        &self,
        cancel: &CancellationToken,
        mut operation: Op,
        mut on_failure: OnFailure,
    ) -> Result<T>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        OnFailure: FnMut(&AttemptFailure<'_>),
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(PusherError::Cancelled);
            }

            attempt += 1;
            tracing::debug!(attempt, "attempting operation");

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempts = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if error.is_cancelled() {
                return Err(error);
            }

            if self.spec.ceiling_reached(attempt) || !self.spec.is_retryable(&error) {
                tracing::error!(attempts = attempt, error = %error, "operation failed, no more retries");
                return Err(PusherError::Exhausted {
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let delay = self.spec.delay_for_attempt(attempt);
            tracing::warn!(attempt, error = %error, delay_ms = delay.as_millis() as u64, "operation failed, retrying");

            on_failure(&AttemptFailure {
                attempt,
                error: &error,
                delay,
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(attempt, "retry wait cancelled");
                    return Err(PusherError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_spec() -> RetrySpec {
        RetrySpec::infinite()
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(0.0)
    }

    #[test]
    fn test_deterministic_delay_without_jitter() {
        let spec = RetrySpec::infinite()
            .with_delays(Duration::from_secs(2), Duration::from_secs(120))
            .with_jitter(0.0);

        assert_eq!(spec.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(spec.delay_for_attempt(2), Duration::from_secs(3));
        assert_eq!(spec.delay_for_attempt(3), Duration::from_millis(4500));
        assert_eq!(spec.delay_for_attempt(50), Duration::from_secs(120));
    }

    #[test]
    fn test_jitter_bounds() {
        let spec = RetrySpec::infinite()
            .with_delays(Duration::from_secs(10), Duration::from_secs(60))
            .with_jitter(0.2);

        for attempt in 1..20 {
            let backoff = spec.backoff_delay(attempt).as_secs_f64();
            let delay = spec.delay_for_attempt(attempt).as_secs_f64();
            assert!(delay >= backoff * 0.8 - 1e-6, "attempt {attempt}: {delay} < {backoff}*0.8");
            assert!(delay <= backoff * 1.2 + 1e-6, "attempt {attempt}: {delay} > {backoff}*1.2");
            assert!(delay <= 60.0, "attempt {attempt}: {delay} exceeds the maximum");
        }
    }

    #[test]
    fn test_jitter_never_exceeds_max_delay() {
        let spec = RetrySpec::infinite()
            .with_delays(Duration::from_secs(10), Duration::from_secs(60))
            .with_jitter(0.2);

        assert_eq!(spec.apply_jitter(spec.backoff_delay(50), 1.0), Duration::from_secs(60));
        assert_eq!(spec.apply_jitter(spec.backoff_delay(50), -1.0), Duration::from_secs(48));
        for _ in 0..2000 {
            assert!(spec.delay_for_attempt(50) <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_jitter_never_negative() {
        let spec = RetrySpec::infinite().with_jitter(1.0);
        assert_eq!(spec.apply_jitter(Duration::from_secs(4), -1.0), Duration::ZERO);
        assert_eq!(spec.apply_jitter(Duration::from_secs(4), 1.0), Duration::from_secs(8));
    }

    #[test]
    fn test_pattern_classification() {
        let spec = RetrySpec::infinite();
        assert!(spec.is_retryable(&PusherError::Network("connection refused by host".into())));
        assert!(spec.is_retryable(&PusherError::Upload("upload failed with status 503: busy".into())));
        assert!(!spec.is_retryable(&PusherError::Upload("upload failed with status 401: denied".into())));
        assert!(!spec.is_retryable(&PusherError::Parse("bad tar header".into())));

        let everything = spec.clone().with_patterns(Vec::<String>::new());
        assert!(everything.is_retryable(&PusherError::Upload("status 401".into())));
    }

    #[tokio::test]
    async fn test_bounded_attempts_then_exhausted() {
        let executor = RetryExecutor::new(fast_spec().with_max_attempts(3));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let mut callbacks = 0;

        let counter = calls.clone();
        let result: Result<()> = executor
            .execute(
                &cancel,
                |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(PusherError::Network("connection refused".into()))
                    }
                },
                |_| callbacks += 1,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(callbacks, 2);
        match result {
            Err(PusherError::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.to_string().contains("connection refused"));
            }
            other => panic!("expected exhausted error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_matching_error_is_terminal_on_first_attempt() {
        let executor = RetryExecutor::new(fast_spec());
        let cancel = CancellationToken::new();

        let result: Result<()> = executor
            .execute(
                &cancel,
                |_| async { Err(PusherError::Upload("upload failed with status 403: no".into())) },
                |_| panic!("callback must not run for terminal errors"),
            )
            .await;

        assert!(matches!(result, Err(PusherError::Exhausted { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(fast_spec());
        let cancel = CancellationToken::new();
        let mut reported = Vec::new();

        let value = executor
            .execute(
                &cancel,
                |attempt| async move {
                    if attempt < 3 {
                        Err(PusherError::Timeout("request timeout".into()))
                    } else {
                        Ok(attempt)
                    }
                },
                |failure| reported.push(failure.attempt),
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(reported, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_second_wait() {
        let executor = RetryExecutor::new(
            RetrySpec::infinite()
                .with_delays(Duration::from_secs(10), Duration::from_secs(60))
                .with_jitter(0.0),
        );
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let trigger = cancel.clone();
        let counter = calls.clone();
        let result: Result<()> = executor
            .execute(
                &cancel,
                |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(PusherError::Network("connection refused".into()))
                    }
                },
                |failure| {
                    if failure.attempt == 2 {
                        trigger.cancel();
                    }
                },
            )
            .await;

        assert!(matches!(result, Err(PusherError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spec_validation() {
        assert!(RetrySpec::infinite().validate().is_ok());
        let mut bad = RetrySpec::infinite();
        bad.jitter = 1.5;
        assert!(bad.validate().is_err());
        let bad = RetrySpec::infinite().with_delays(Duration::from_secs(10), Duration::from_secs(1));
        assert!(bad.validate().is_err());
    }
}
