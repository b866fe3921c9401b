use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, warn};

use super::{ModelClient, RawCompletion};
use crate::error::ModelError;
use crate::prompt::ModelPayload;

/// Bounded retry schedule for model calls. Only errors for which
/// [`ModelError::is_retryable`] holds are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error or the
    /// retry budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff_for(attempt);
                    warn!(error = %err, attempt, ?delay, "transient model failure; retrying");
                    sleep(delay).await;
                }
                Err(err) => {
                    if err == ModelError::Unauthorized {
                        error!("model provider rejected credentials; check the configured API key");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Decorates a [`ModelClient`] with a [`RetryPolicy`].
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ModelClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RetryingClient<C> {
    async fn complete(&self, payload: &ModelPayload) -> Result<RawCompletion, ModelError> {
        self.policy.run(|| self.inner.complete(payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        outcomes: Mutex<Vec<Result<RawCompletion, ModelError>>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(mut outcomes: Vec<Result<RawCompletion, ModelError>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(&self, _payload: &ModelPayload) -> Result<RawCompletion, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ModelError::Transport("script exhausted".into())))
        }
    }

    fn payload() -> ModelPayload {
        ModelPayload {
            system_instruction: "sys",
            user_content: "msg".into(),
            was_image: false,
            hints: Vec::new(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn retries_rate_limit_once() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Err(ModelError::RateLimited), Ok("{}".into())]),
            fast_policy(),
        );
        let completion = client.complete(&payload()).await.unwrap();
        assert_eq!(completion.as_str(), "{}");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_single_retry() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![
                Err(ModelError::Timeout),
                Err(ModelError::Timeout),
                Ok("{}".into()),
            ]),
            fast_policy(),
        );
        assert_eq!(client.complete(&payload()).await, Err(ModelError::Timeout));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn never_retries_unauthorized() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Err(ModelError::Unauthorized), Ok("{}".into())]),
            fast_policy(),
        );
        assert_eq!(
            client.complete(&payload()).await,
            Err(ModelError::Unauthorized)
        );
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_errors_surface_immediately() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Err(ModelError::Transport("reset".into()))]),
            fast_policy(),
        );
        assert!(matches!(
            client.complete(&payload()).await,
            Err(ModelError::Transport(_))
        ));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy =
            RetryPolicy::default().with_backoff(Duration::from_millis(200), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(1));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
