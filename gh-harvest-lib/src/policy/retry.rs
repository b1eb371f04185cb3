use super::CallOutcome;
use crate::Result;
use chrono::{DateTime, Utc};
use core::fmt::{Debug, Formatter};
use core::time::Duration;
use layered::{Execute, Service, Stack};
use ohno::app_err;
use seatbelt::retry::{Backoff, Retry};
use seatbelt::{RecoveryInfo, ResilienceContext};
use std::sync::{Arc, Mutex};
use tick::Clock;

const LOG_TARGET: &str = "     retry";

/// Added on top of the advertised reset time before retrying a throttled call.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Wait used when a throttled response carries no reset time.
pub const DEFAULT_FALLBACK_WAIT: Duration = Duration::from_secs(60);

/// Immediate retries granted to transport failures.
pub const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 5;

/// Retries granted to the upstream sub-query that is known to time out.
pub const DEFAULT_MAX_FLAKY_RETRIES: u32 = 20;

/// Attempt ceiling handed to the retry layer when throttle waits are uncapped.
const UNBOUNDED_ATTEMPTS: u32 = u32::MAX / 2;

/// Wraps outbound calls with throttling backoff and bounded retries.
///
/// The policy is transport-agnostic: every transport classifies its own raw
/// result into a [`CallOutcome`], and the [`seatbelt`] retry layer built by
/// [`RetryPolicy::call`] acts on the class:
///
/// - `Throttled` waits until `reset + grace` and retries the identical call;
/// - `Transient` retries immediately, up to `max_transient_retries` times;
/// - `FlakyUpstream` retries up to `max_flaky_retries` times;
/// - `Fatal` is returned as-is.
///
/// Exhausting a retry budget turns the last failure into a fatal error.
#[derive(Clone)]
pub struct RetryPolicy {
    clock: Clock,
    limits: Limits,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    grace_period: Duration,
    fallback_wait: Duration,
    max_transient_retries: u32,
    max_flaky_retries: u32,
    max_throttle_waits: Option<u32>,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(clock: Clock) -> Self {
        Self {
            clock,
            limits: Limits {
                grace_period: DEFAULT_GRACE_PERIOD,
                fallback_wait: DEFAULT_FALLBACK_WAIT,
                max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
                max_flaky_retries: DEFAULT_MAX_FLAKY_RETRIES,
                max_throttle_waits: None,
            },
        }
    }

    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.limits.grace_period = grace_period;
        self
    }

    #[must_use]
    pub const fn with_fallback_wait(mut self, fallback_wait: Duration) -> Self {
        self.limits.fallback_wait = fallback_wait;
        self
    }

    #[must_use]
    pub const fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.limits.max_transient_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_max_flaky_retries(mut self, retries: u32) -> Self {
        self.limits.max_flaky_retries = retries;
        self
    }

    /// Cap the number of consecutive throttle waits. `None` waits forever.
    #[must_use]
    pub const fn with_max_throttle_waits(mut self, waits: Option<u32>) -> Self {
        self.limits.max_throttle_waits = waits;
        self
    }

    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Current wall-clock time according to the policy's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from(self.clock.system_time())
    }

    /// How long to wait after a throttled response with the given reset time.
    #[must_use]
    pub fn throttle_wait(&self, reset_at: Option<DateTime<Utc>>) -> Duration {
        self.limits.throttle_wait(reset_at, self.now())
    }

    /// Run `attempt` until it succeeds, fails fatally, or exhausts a retry budget.
    ///
    /// `operation` names the call in log messages and errors.
    pub async fn call<T, F, Fut>(&self, operation: &str, attempt: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallOutcome<T>> + Send + 'static,
    {
        let budget = Arc::new(Budget::new(self.clone(), operation));
        let context = ResilienceContext::new(&self.clock).name("harvest");

        let service = (
            Retry::layer("retry", &context)
                .clone_input()
                .recovery_with({
                    let budget = Arc::clone(&budget);
                    move |outcome: &CallOutcome<T>, _| budget.recover(outcome)
                })
                .max_retry_attempts(self.limits.max_attempts())
                .base_delay(Duration::ZERO)
                .backoff(Backoff::Constant),
            Execute::new(move |(): ()| attempt()),
        )
            .into_service();

        let outcome = service.execute(()).await;
        budget.finish(outcome)
    }
}

impl Debug for RetryPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryPolicy").field("limits", &self.limits).finish_non_exhaustive()
    }
}

impl Limits {
    fn throttle_wait(&self, reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let base = reset_at.map_or(self.fallback_wait, |reset| (reset - now).to_std().unwrap_or(Duration::ZERO));
        base + self.grace_period
    }

    fn max_attempts(&self) -> u32 {
        self.max_throttle_waits.map_or(UNBOUNDED_ATTEMPTS, |throttle_waits| {
            self.max_transient_retries
                .saturating_add(self.max_flaky_retries)
                .saturating_add(throttle_waits)
                .min(UNBOUNDED_ATTEMPTS)
        })
    }
}

#[derive(Debug, Default)]
struct Spent {
    transient: u32,
    flaky: u32,
    throttle_waits: u32,
}

/// Per-call retry accounting consulted by the retry layer after every attempt.
struct Budget {
    policy: RetryPolicy,
    operation: String,
    spent: Mutex<Spent>,
}

impl Budget {
    fn new(policy: RetryPolicy, operation: &str) -> Self {
        Self {
            policy,
            operation: operation.to_string(),
            spent: Mutex::new(Spent::default()),
        }
    }

    fn recover<T>(&self, outcome: &CallOutcome<T>) -> RecoveryInfo {
        let limits = &self.policy.limits;
        let operation = &self.operation;
        let mut spent = self.spent.lock().expect("lock poisoned");

        match outcome {
            CallOutcome::Success(_) | CallOutcome::Fatal(_) => RecoveryInfo::never(),

            CallOutcome::Throttled { reset_at } => {
                if limits.max_throttle_waits.is_some_and(|max| spent.throttle_waits >= max) {
                    return RecoveryInfo::never();
                }
                spent.throttle_waits += 1;

                let now = self.policy.now();
                let wait = limits.throttle_wait(*reset_at, now);
                let resume_at = now + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
                log::warn!(
                    target: LOG_TARGET,
                    "Rate limit exceeded during {operation}: waiting {}s until {}",
                    wait.as_secs(),
                    resume_at.with_timezone(&chrono::Local).format("%T")
                );
                RecoveryInfo::retry().delay(wait)
            }

            CallOutcome::Transient(e) => {
                if spent.transient >= limits.max_transient_retries {
                    return RecoveryInfo::never();
                }
                spent.transient += 1;
                log::debug!(
                    target: LOG_TARGET,
                    "Retrying {operation} after transient failure (attempt {}/{}): {e:#}",
                    spent.transient,
                    limits.max_transient_retries
                );
                RecoveryInfo::retry()
            }

            CallOutcome::FlakyUpstream(e) => {
                if spent.flaky >= limits.max_flaky_retries {
                    return RecoveryInfo::never();
                }
                spent.flaky += 1;
                log::info!(
                    target: LOG_TARGET,
                    "Retrying {operation} after upstream timeout (attempt {}/{}): {e:#}",
                    spent.flaky,
                    limits.max_flaky_retries
                );
                RecoveryInfo::retry()
            }
        }
    }

    fn finish<T>(&self, outcome: CallOutcome<T>) -> Result<T> {
        let operation = &self.operation;
        let spent = self.spent.lock().expect("lock poisoned");

        match outcome {
            CallOutcome::Success(value) => {
                if spent.transient + spent.flaky + spent.throttle_waits > 0 {
                    log::debug!(
                        target: LOG_TARGET,
                        "{operation} succeeded after {} transient, {} flaky, and {} throttled attempt(s)",
                        spent.transient,
                        spent.flaky,
                        spent.throttle_waits
                    );
                }
                Ok(value)
            }
            CallOutcome::Throttled { .. } => Err(app_err!("{operation}: still throttled after {} wait(s)", spent.throttle_waits)),
            CallOutcome::Transient(e) => Err(app_err!("{operation} failed after {} retries: {e:#}", spent.transient)),
            CallOutcome::FlakyUpstream(e) => Err(app_err!("{operation} failed after {} retries: {e:#}", spent.flaky)),
            CallOutcome::Fatal(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use ohno::app_err;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Clock::new_tokio())
    }

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test]
    async fn wait_is_reset_plus_grace() {
        let limits = policy().limits;
        let now = DateTime::from_timestamp(1_704_067_200, 0).unwrap();

        assert_eq!(limits.throttle_wait(Some(now + chrono::Duration::seconds(30)), now), Duration::from_secs(35));
        assert_eq!(limits.throttle_wait(None, now), DEFAULT_FALLBACK_WAIT + DEFAULT_GRACE_PERIOD);
        assert_eq!(limits.throttle_wait(Some(now - chrono::Duration::seconds(100)), now), DEFAULT_GRACE_PERIOD);
    }

    #[tokio::test]
    async fn attempt_ceiling_covers_every_budget() {
        let capped = policy()
            .with_max_transient_retries(3)
            .with_max_flaky_retries(4)
            .with_max_throttle_waits(Some(2));
        assert_eq!(capped.limits.max_attempts(), 9);
        assert_eq!(policy().limits.max_attempts(), UNBOUNDED_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn success_needs_no_retry() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let start = Instant::now();

        let value = policy()
            .call("test", move || {
                let _ = seen.fetch_add(1, Ordering::SeqCst);
                async { CallOutcome::Success(7) }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_retry_waits_for_reset_plus_grace() {
        let policy = policy();
        let reset_at = policy.now() + chrono::Duration::seconds(30);
        let calls = counter();
        let seen = Arc::clone(&calls);
        let start = Instant::now();

        let value = policy
            .call("test", move || {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        CallOutcome::Throttled { reset_at: Some(reset_at) }
                    } else {
                        CallOutcome::Success("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(34) && waited <= Duration::from_secs(36), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_without_reset_uses_fallback() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let start = Instant::now();

        policy()
            .call("test", move || {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        CallOutcome::Throttled { reset_at: None }
                    } else {
                        CallOutcome::Success(())
                    }
                }
            })
            .await
            .unwrap();

        assert!(start.elapsed() >= DEFAULT_FALLBACK_WAIT + DEFAULT_GRACE_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_cap_turns_fatal() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let policy = policy().with_max_throttle_waits(Some(2));

        let err = policy
            .call("test", move || {
                let _ = seen.fetch_add(1, Ordering::SeqCst);
                async { CallOutcome::<()>::Throttled { reset_at: None } }
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("still throttled after 2 wait(s)"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_retries_are_bounded_and_immediate() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let start = Instant::now();

        let result = policy()
            .with_max_transient_retries(3)
            .call("test", move || {
                let _ = seen.fetch_add(1, Ordering::SeqCst);
                async { CallOutcome::<()>::Transient(app_err!("connection reset")) }
            })
            .await;

        assert!(result.unwrap_err().to_string().contains("connection reset"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let value = policy()
            .call("test", move || {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        CallOutcome::Transient(app_err!("reset"))
                    } else {
                        CallOutcome::Success(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flaky_budget_is_separate_and_larger() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let result = policy()
            .call("test", move || {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < DEFAULT_MAX_TRANSIENT_RETRIES {
                        CallOutcome::<()>::Transient(app_err!("reset"))
                    } else {
                        CallOutcome::<()>::FlakyUpstream(app_err!("timedout"))
                    }
                }
            })
            .await;

        assert!(result.unwrap_err().to_string().contains("timedout"));
        assert_eq!(
            calls.load(Ordering::SeqCst),
            DEFAULT_MAX_TRANSIENT_RETRIES + DEFAULT_MAX_FLAKY_RETRIES + 1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_is_not_retried() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let result = policy()
            .call("test", move || {
                let _ = seen.fetch_add(1, Ordering::SeqCst);
                async { CallOutcome::<()>::Fatal(app_err!("permission denied")) }
            })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "permission denied");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
