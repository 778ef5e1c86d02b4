use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::PipelineConfig;
use crate::error::ServiceError;

/// The external model that turns a prompt into text.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn evaluate(&self, prompt: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            call_timeout: config.call_timeout,
        }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// Sender half of the cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, signal) = cancellation();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. If every handle was dropped
    /// without cancelling, it never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCall {
    pub error: ServiceError,
    pub attempts: u32,
}

/// Calls the service, backing off exponentially on rate limits until the
/// attempt budget runs out. Every other failure is returned as-is.
pub async fn call_with_retry(
    service: &dyn ReasoningService,
    prompt: &str,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
) -> Result<String, FailedCall> {
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(FailedCall {
                error: ServiceError::Cancelled,
                attempts: attempt,
            });
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled),
            outcome = tokio::time::timeout(policy.call_timeout, service.evaluate(prompt)) => {
                outcome.unwrap_or(Err(ServiceError::Timeout(policy.call_timeout)))
            }
        };

        match result {
            Ok(text) => return Ok(text),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reasoning service rate limited; backing off: {err}"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(FailedCall {
                            error: ServiceError::Cancelled,
                            attempts: attempt,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(error) => {
                return Err(FailedCall {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ServiceError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ReasoningService for Scripted {
        async fn evaluate(&self, _prompt: &str) -> Result<String, ServiceError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default".to_string()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl ReasoningService for Stalled {
        async fn evaluate(&self, _prompt: &str) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok("late".to_string())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::from_millis(100),
            call_timeout: Duration::from_secs(30),
        }
    }

    fn rate_limited() -> Result<String, ServiceError> {
        Err(ServiceError::RateLimited("429".to_string()))
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = policy(5);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried_within_budget() {
        let service = Scripted::new(vec![rate_limited(), rate_limited(), Ok("done".into())]);
        let text = call_with_retry(&service, "p", &policy(3), &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(text, "done");
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_gives_up_on_rate_limit() {
        let service = Scripted::new(vec![rate_limited(), Ok("done".into())]);
        let failed = call_with_retry(&service, "p", &policy(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(failed.attempts, 1);
        assert!(matches!(failed.error, ServiceError::RateLimited(_)));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn service_errors_are_not_retried() {
        let service = Scripted::new(vec![Err(ServiceError::Service("bad".into()))]);
        let failed = call_with_retry(&service, "p", &policy(5), &CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.error, ServiceError::Service("bad".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_secs(5),
            ..policy(3)
        };
        let failed = call_with_retry(&Stalled, "p", &policy, &CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(failed.error, ServiceError::Timeout(Duration::from_secs(5)));
        assert_eq!(failed.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_call() {
        let (handle, signal) = cancellation();
        let call = tokio::spawn(async move {
            call_with_retry(&Stalled, "p", &policy(3), &signal).await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        let failed = call.await.unwrap().unwrap_err();
        assert_eq!(failed.error, ServiceError::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_signal_short_circuits() {
        let (handle, signal) = cancellation();
        handle.cancel();
        let service = Scripted::new(vec![]);
        let failed = call_with_retry(&service, "p", &policy(3), &signal)
            .await
            .unwrap_err();
        assert_eq!(failed.error, ServiceError::Cancelled);
        assert_eq!(failed.attempts, 0);
        assert_eq!(service.calls(), 0);
    }
}
