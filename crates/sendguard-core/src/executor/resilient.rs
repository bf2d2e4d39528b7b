//! Timeout, retry and circuit-breaker wrapper for any executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{CircuitBreaker, CircuitState, Executor};
use crate::decisions::ActionTaken;
use crate::settings::ExecutorSettings;
use crate::{Error, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

enum Call<'a> {
    Execute(&'a ActionTaken),
    Push(&'a str, &'a str),
}

impl Call<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Execute(action) => action.to_string(),
            Self::Push(path, _) => format!("push {path}"),
        }
    }
}

/// Bounds every call with a timeout, retries transient failures with
/// exponential backoff, and refuses calls while the breaker is open.
///
/// One exhausted call counts as one breaker failure.
pub struct ResilientExecutor {
    inner: Arc<dyn Executor>,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    breaker: CircuitBreaker,
}

impl ResilientExecutor {
    /// Wraps `inner` using the timeout, retry and breaker settings.
    #[must_use]
    pub fn new(inner: Arc<dyn Executor>, settings: &ExecutorSettings) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(settings.timeout_secs),
            retries: settings.retries,
            backoff: Duration::from_millis(settings.backoff_ms),
            breaker: CircuitBreaker::new(
                settings.breaker_failure_threshold,
                settings.breaker_success_threshold,
                Duration::from_secs(settings.breaker_open_secs),
            ),
        }
    }

    /// Current breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    async fn attempt(&self, call: &Call<'_>) -> Result<String> {
        let fut = async {
            match call {
                Call::Execute(action) => self.inner.execute(action).await,
                Call::Push(path, contents) => {
                    self.inner.push_file(path, contents).await.map(|()| String::new())
                }
            }
        };
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| Err(Error::Timeout(self.timeout)))
    }

    async fn call(&self, call: Call<'_>) -> Result<String> {
        if !self.breaker.allow_request() {
            return Err(Error::CircuitOpen);
        }

        let mut backoff = self.backoff;
        let mut attempt = 0;
        loop {
            match self.attempt(&call).await {
                Ok(output) => {
                    self.breaker.record_success();
                    return Ok(output);
                }
                Err(e) if !e.is_transient() => {
                    self.breaker.cancel_trial();
                    return Err(e);
                }
                Err(e) if attempt >= self.retries => {
                    self.breaker.record_failure();
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        call = %call.describe(),
                        attempt,
                        error = %e,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Remote call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[async_trait]
impl Executor for ResilientExecutor {
    async fn execute(&self, action: &ActionTaken) -> Result<String> {
        self.call(Call::Execute(action)).await
    }

    async fn push_file(&self, remote_path: &str, contents: &str) -> Result<()> {
        self.call(Call::Push(remote_path, contents)).await.map(|_| ())
    }

    fn is_available(&self) -> bool {
        self.breaker.is_available() && self.inner.is_available()
    }
}
