//! Short-lived cache in front of a challenge (captcha) solver.

use crate::traits::ChallengeSolver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CachedToken {
    value: String,
    issued_at: Instant,
}

#[derive(Default)]
struct PoolState {
    token: Option<CachedToken>,
    /// When the last solve came back empty.
    failed_at: Option<Instant>,
}

/// Hands out one solved token to every login inside `validity`, then solves
/// again. Concurrent callers wait on the same solve instead of starting their own.
/// After a failed solve, callers get `None` without solving until
/// `failure_cooldown` has passed.
pub struct ChallengeTokenPool {
    solver: Arc<dyn ChallengeSolver>,
    validity: Duration,
    failure_cooldown: Duration,
    state: Mutex<PoolState>,
}

impl ChallengeTokenPool {
    pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(7);
    /// Shorter than the login backoff, so a retrying login solves again.
    pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_secs(5);

    pub fn new(solver: Arc<dyn ChallengeSolver>) -> Self {
        Self::with_validity(solver, Self::DEFAULT_VALIDITY)
    }

    pub fn with_validity(solver: Arc<dyn ChallengeSolver>, validity: Duration) -> Self {
        Self {
            solver,
            validity,
            failure_cooldown: Self::DEFAULT_FAILURE_COOLDOWN,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn with_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = cooldown;
        self
    }

    pub async fn get_token(&self) -> Option<String> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.token.as_ref() {
            if cached.issued_at.elapsed() < self.validity {
                debug!("Reusing cached {} token", self.solver.name());
                return Some(cached.value.clone());
            }
        }
        if let Some(failed_at) = state.failed_at {
            if failed_at.elapsed() < self.failure_cooldown {
                debug!("{} failed recently, not solving again yet", self.solver.name());
                return None;
            }
        }

        match self.solver.solve().await {
            Some(value) => {
                state.token = Some(CachedToken {
                    value: value.clone(),
                    issued_at: Instant::now(),
                });
                state.failed_at = None;
                Some(value)
            }
            None => {
                warn!("{} returned no token", self.solver.name());
                state.failed_at = Some(Instant::now());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSolver {
        calls: AtomicUsize,
        /// Number of leading solves that return nothing.
        failures: usize,
    }

    #[async_trait]
    impl ChallengeSolver for CountingSolver {
        fn name(&self) -> &str {
            "counting"
        }

        async fn solve(&self) -> Option<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures > n {
                return None;
            }
            Some(format!("token-{}", n))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_reused_within_validity() {
        let solver = Arc::new(CountingSolver {
            calls: AtomicUsize::new(0),
            failures: 0,
        });
        let pool = ChallengeTokenPool::new(solver.clone());

        assert_eq!(pool.get_token().await.as_deref(), Some("token-0"));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(pool.get_token().await.as_deref(), Some("token-0"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(pool.get_token().await.as_deref(), Some("token-1"));
        assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_solve_is_not_repeated_during_cooldown() {
        let solver = Arc::new(CountingSolver {
            calls: AtomicUsize::new(0),
            failures: 1,
        });
        let pool = ChallengeTokenPool::new(solver.clone());

        assert_eq!(pool.get_token().await, None);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(pool.get_token().await, None);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(pool.get_token().await.as_deref(), Some("token-1"));
        assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
    }
}
