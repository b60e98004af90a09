//! Circuit breaker guarding calls to the processor.
//!
//! State is process-local: each gateway instance learns about
//! processor health from its own traffic and never shares it.
//!
//! - **Closed**: calls pass. Failures increment a consecutive counter, any
//!   success resets it. Reaching the threshold opens the circuit.
//! - **Open**: calls are rejected without a network attempt. Once the
//!   cooldown has elapsed the next call moves the breaker to half-open.
//! - **HalfOpen**: exactly one trial call is in flight. Its outcome alone
//!   decides between closed and open; every other call is rejected.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Hint for how long callers should wait before retrying.
    pub retry_after: Duration,
}

/// Point-in-time view of the breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Stamp {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Stamp {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Stamp>,
    opened: Option<Stamp>,
    trial_in_flight: bool,
}

/// Failure-tracking guard around one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

/// Admission ticket for one call. Settle it with [`Permit::success`] or
/// [`Permit::failure`]; a permit dropped unsettled counts as a failure.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl Permit {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.trial, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.trial, false);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_outcome(self.trial, false);
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                opened: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask to make a call. Moves open to half-open once the cooldown has
    /// elapsed; the caller that triggers that move holds the trial.
    pub fn try_acquire(self: &Arc<Self>) -> Result<Permit, Rejected> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let remaining = self.cooldown_remaining(&inner);
                if !remaining.is_zero() {
                    return Err(Rejected {
                        retry_after: remaining,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!("Circuit breaker half-open, allowing one trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(Rejected {
                        retry_after: Duration::from_secs(1),
                    });
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    /// Non-mutating admission check: would a call be refused right now?
    pub fn check(&self) -> Result<(), Rejected> {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = self.cooldown_remaining(&inner);
                if remaining.is_zero() {
                    Ok(())
                } else {
                    Err(Rejected {
                        retry_after: remaining,
                    })
                }
            }
            CircuitState::HalfOpen if inner.trial_in_flight => Err(Rejected {
                retry_after: Duration::from_secs(1),
            }),
            CircuitState::HalfOpen => Ok(()),
        }
    }

    fn on_outcome(&self, trial: bool, success: bool) {
        let mut inner = self.lock();
        if !success {
            // A late failure from a call admitted while closed says nothing
            // new once the circuit has opened.
            if trial || inner.state == CircuitState::Closed {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            }
            inner.last_failure = Some(Stamp::now());
        }

        if trial {
            inner.trial_in_flight = false;
            if success {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened = None;
                info!("Circuit breaker closed after successful trial call");
            } else {
                inner.state = CircuitState::Open;
                inner.opened = Some(Stamp::now());
                warn!(
                    consecutive_failures = inner.consecutive_failures,
                    "Trial call failed, circuit breaker re-opened"
                );
            }
            return;
        }

        // Outcomes of calls admitted before the circuit opened only touch
        // the counters once the breaker has left the closed state.
        if inner.state != CircuitState::Closed {
            return;
        }

        if success {
            inner.consecutive_failures = 0;
        } else if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened = Some(Stamp::now());
            warn!(
                consecutive_failures = inner.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    fn cooldown_remaining(&self, inner: &Inner) -> Duration {
        inner
            .opened
            .map(|s| self.config.cooldown.saturating_sub(s.at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_after_secs = match inner.state {
            CircuitState::Open => Some(self.cooldown_remaining(&inner).as_secs()),
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure.map(|s| s.wall),
            opened_at: inner.opened.map(|s| s.wall),
            retry_after_secs,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            BreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_cooldown(Duration::from_secs(cooldown_secs)),
        ))
    }

    fn fail_times(cb: &Arc<CircuitBreaker>, n: u32) {
        for _ in 0..n {
            cb.try_acquire().unwrap().failure();
        }
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let cb = breaker(5, 30);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let cb = breaker(5, 30);
        fail_times(&cb, 4);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail_times(&cb, 1);
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.try_acquire().unwrap_err();
        assert!(rejected.retry_after <= Duration::from_secs(30));
        assert!(rejected.retry_after > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let cb = breaker(3, 30);
        fail_times(&cb, 2);
        cb.try_acquire().unwrap().success();
        assert_eq!(cb.consecutive_failures(), 0);

        fail_times(&cb, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail_times(&cb, 1);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_rejection_is_not_an_attempt() {
        let cb = breaker(2, 30);
        fail_times(&cb, 2);
        for _ in 0..10 {
            assert!(cb.try_acquire().is_err());
        }
        assert_eq!(cb.consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_exactly_one_trial() {
        let cb = breaker(2, 30);
        fail_times(&cb, 2);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.check().is_ok());
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Everyone else is refused while the trial is in flight
        assert!(cb.try_acquire().is_err());
        assert!(cb.check().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let cb = breaker(2, 30);
        fail_times(&cb, 2);
        tokio::time::advance(Duration::from_secs(30)).await;

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 3);

        // Cooldown restarts from the failed trial
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.try_acquire().is_err());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_counts_as_failure() {
        let cb = breaker(1, 5);
        fail_times(&cb, 1);
        tokio::time::advance(Duration::from_secs(5)).await;

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_late_outcome_does_not_close_open_circuit() {
        let cb = breaker(1, 30);
        let slow = cb.try_acquire().unwrap();
        fail_times(&cb, 1);
        assert_eq!(cb.state(), CircuitState::Open);

        slow.success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failures_are_not_counted_once_open() {
        let cb = breaker(1, 30);
        let mut slow: Vec<_> = (0..3).map(|_| cb.try_acquire().unwrap()).collect();
        fail_times(&cb, 1);
        assert_eq!(cb.state(), CircuitState::Open);

        let straggler = slow.pop().unwrap();
        for permit in slow {
            permit.failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 1);
        assert_eq!(cb.snapshot().consecutive_failures, 1);

        // Nor while the trial is in flight
        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = cb.try_acquire().unwrap();
        straggler.failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.consecutive_failures(), 1);

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let cb = breaker(1, 30);
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert!(snap.opened_at.is_none());

        fail_times(&cb, 1);
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert!(snap.opened_at.is_some());
        assert!(snap.last_failure_at.is_some());
        assert!(snap.retry_after_secs.is_some());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["state"], "open");
    }
}
