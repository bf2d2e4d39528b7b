//! Circuit breaker guarding remote commands.
//!
//! Closed until `failure_threshold` consecutive failures, then open for
//! `open_for`. After that one trial call at a time is let through
//! (half-open); `success_threshold` successes close it, any failure
//! reopens it.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::sync::lock;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused.
    Open,
    /// A trial call is allowed.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    trial_in_flight: bool,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    open_for: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(failure_threshold: u32, success_threshold: u32, open_for: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_for,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                trial_in_flight: false,
                opened_at: None,
            }),
        }
    }

    fn check_timeout(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && inner.opened_at.is_some_and(|at| at.elapsed() >= self.open_for)
        {
            info!("Circuit breaker half-open");
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
            inner.trial_in_flight = false;
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        let mut inner = lock(&self.inner);
        self.check_timeout(&mut inner);
        inner.state
    }

    /// Returns true if a call may proceed. In half-open state only one
    /// trial call is admitted until its result is recorded.
    pub fn allow_request(&self) -> bool {
        let mut inner = lock(&self.inner);
        self.check_timeout(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Returns true unless the breaker is open and still cooling down.
    pub fn is_available(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = lock(&self.inner);
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                inner.trial_in_flight = false;
                if inner.successes >= self.success_threshold {
                    info!(successes = inner.successes, "Circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = lock(&self.inner);
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    warn!(failures = inner.failures, "Circuit breaker opened");
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker reopened after failed trial");
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// Releases a half-open trial slot without recording an outcome, for
    /// calls that failed before reaching the remote host.
    pub fn cancel_trial(&self) {
        lock(&self.inner).trial_in_flight = false;
    }

    /// Forces the breaker closed.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.trial_in_flight = false;
        inner.opened_at = None;
    }
}
