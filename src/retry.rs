use crate::config::RetryConfig;
use crate::errors::{EngineError, EngineResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_retries,
            current_attempt: 0,
        }
    }

    /// Backoff that permits `config.max_attempts` calls in total
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts.saturating_sub(1),
        )
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = self.delay_for(self.current_attempt);

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_millis()
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }
}

/// Run `op` until it succeeds, retrying transport failures with backoff
///
/// Non-retriable errors (e.g. `FilterInvalid`) are returned immediately so the
/// caller can handle them. Exhaustion yields `RetriesExhausted`.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut backoff = ExponentialBackoff::from_config(config);

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() => {
                log::warn!("⚠️  {} failed: {}", label, e);
                if backoff.sleep().await.is_err() {
                    log::error!("❌ {} gave up after {} attempts", label, backoff.attempts() + 1);
                    return Err(EngineError::RetriesExhausted {
                        attempts: backoff.attempts() + 1,
                        last_error: e.to_string(),
                    });
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 4,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_millis(3000), 10);
        assert_eq!(backoff.delay_for(0), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(3000));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_backoff_exhausts() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(1), 2);
        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_err());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.sleep().await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transport_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast_config(5), "test op", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(EngineError::Transport("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_fatal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: EngineResult<()> = retry_with_backoff(&fast_config(3), "test op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Transport("down".into()))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            err,
            EngineError::RetriesExhausted {
                attempts: 3,
                last_error: "Transport error: down".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retriable_error_passes_through() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: EngineResult<()> = retry_with_backoff(&fast_config(5), "test op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::FilterInvalid)
            }
        })
        .await;

        assert_eq!(result, Err(EngineError::FilterInvalid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
