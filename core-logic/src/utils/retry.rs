use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff policy. `exponential_base = 1.0` gives a constant delay.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Constant delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: base_delay * 30,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn without_jitter(self) -> Self {
        self.with_jitter(false)
    }

    /// Delay before the attempt following `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = (base_ms * self.exponential_base.powi(attempt as i32))
            .min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter {
            // ±25%
            delay_ms * rand::thread_rng().gen_range(0.75..=1.25)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error stopped the loop early.
    Fatal(E),
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "failed after {} attempts: {}", attempts, last)
            }
            RetryError::Fatal(e) => write!(f, "{}", e),
            RetryError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Sleeps for `duration` unless `cancel` fires first. Returns `false` on cancel.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, runs out of attempts, or `cancel` fires.
pub async fn with_retry<T, E, F, Fut, R>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    operation: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt + 1);
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                debug!("{} failed with non-retryable error: {}", operation_name, e);
                return Err(RetryError::Fatal(e));
            }
            Err(e) => {
                if attempt + 1 >= attempts {
                    debug!("{} failed after {} attempts", operation_name, attempts);
                    return Err(RetryError::Exhausted { attempts, last: e });
                }

                let delay = config.calculate_delay(attempt);
                debug!(
                    "{} failed (attempt {}/{}). Retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    attempts,
                    delay,
                    e
                );

                if !sleep_or_cancel(delay, cancel).await {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}
