use crate::account::Account;
use crate::config::DispatchConfig;
use crate::coordinator::{CoordinatorSummary, RetryCoordinator};
use crate::metrics::MetricsCollector;
use crate::traits::{AccountProcessor, WorkerContext};
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::retry::sleep_or_cancel;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

/// Delay inserted between two submissions of the same wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stagger {
    None,
    /// Uniformly random, whole seconds, inclusive.
    RandomSecs(u64, u64),
    Fixed(Duration),
}

impl Stagger {
    fn delay(&self) -> Duration {
        match *self {
            Stagger::None => Duration::ZERO,
            Stagger::RandomSecs(min, max) => {
                Duration::from_secs(rand::thread_rng().gen_range(min..=max.max(min)))
            }
            Stagger::Fixed(d) => d,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WaveReport {
    pub wave: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub waves: Vec<WaveReport>,
    pub accounts: CoordinatorSummary,
    pub cancelled: bool,
    pub duration: Duration,
}

/// Fixed pool of worker slots fed through a rendezvous channel.
///
/// Slot ids are stable for the lifetime of a wave and key the rate limiter.
pub struct ConcurrentDispatcher {
    config: DispatchConfig,
    coordinator: Arc<RetryCoordinator>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ConcurrentDispatcher {
    pub fn new(
        config: DispatchConfig,
        coordinator: Arc<RetryCoordinator>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            coordinator,
            limiter,
            cancel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn coordinator(&self) -> &Arc<RetryCoordinator> {
        &self.coordinator
    }

    /// Runs `processor` once for every account and waits for the wave to drain.
    /// Accounts the coordinator does not know yet are registered as `Pending`.
    pub async fn run_wave(
        &self,
        wave: usize,
        accounts: Vec<Account>,
        processor: Arc<dyn AccountProcessor>,
        stagger: Stagger,
    ) -> WaveReport {
        let start_time = Instant::now();
        self.coordinator.register(&accounts);
        let submitted = accounts.len();
        let workers = self.config.threads.min(submitted).max(1);

        let (tx, rx) = mpsc::channel::<Account>(1);
        let rx = Arc::new(Mutex::new(rx));
        let mut set = JoinSet::new();

        for slot in 0..workers {
            let rx = rx.clone();
            let processor = processor.clone();
            let coordinator = self.coordinator.clone();
            let limiter = self.limiter.clone();
            let cancel = self.cancel.clone();
            let metrics = self.metrics.clone();
            let span = tracing::info_span!("worker", slot = format!("{:03}", slot + 1));

            set.spawn(
                async move {
                    let mut succeeded = 0usize;
                    let mut failed = 0usize;
                    loop {
                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                account = rx.recv() => account,
                                _ = cancel.cancelled() => None,
                            }
                        };
                        let Some(account) = next else { break };

                        let Some(attempt) = coordinator.begin_attempt(&account) else {
                            continue;
                        };
                        let ctx = WorkerContext {
                            slot,
                            attempt,
                            cancel: cancel.clone(),
                            limiter: limiter.clone(),
                        };

                        let outcome = processor.process(&account, &ctx).await;
                        if cancel.is_cancelled() && !outcome.is_success() {
                            coordinator.abandon_attempt(&account);
                            break;
                        }

                        let state = coordinator.record_outcome(&account, &outcome).await;
                        if let Some(m) = &metrics {
                            m.record_account(&state);
                        }
                        if outcome.is_success() {
                            succeeded += 1;
                        } else {
                            failed += 1;
                        }
                    }
                    (succeeded, failed)
                }
                .instrument(span),
            );
        }

        for (i, account) in accounts.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            if i > 0 && !sleep_or_cancel(stagger.delay(), &self.cancel).await {
                break;
            }
            if tx.send(account).await.is_err() {
                warn!("All workers exited before the wave was fully submitted");
                break;
            }
        }
        drop(tx);

        let mut report = WaveReport {
            wave,
            submitted,
            ..Default::default()
        };
        while let Some(res) = set.join_next().await {
            match res {
                Ok((ok, failed)) => {
                    report.succeeded += ok;
                    report.failed += failed;
                }
                Err(e) => {
                    error!("A worker task panicked or failed to join: {:?}", e);
                }
            }
        }
        report.duration = start_time.elapsed();

        if let Some(m) = &self.metrics {
            m.record_wave();
        }
        info!(
            target: "task_result",
            "Wave {} done in {:.1}s | Success: {} | Fail: {}",
            wave,
            report.duration.as_secs_f64(),
            report.succeeded,
            report.failed
        );
        report
    }

    /// First wave over `initial`, then retry waves while the coordinator asks for them.
    pub async fn run_until_converged(
        &self,
        initial: Vec<Account>,
        processor: Arc<dyn AccountProcessor>,
    ) -> RunSummary {
        let start_time = Instant::now();
        self.coordinator.register(&initial);

        let mut summary = RunSummary::default();
        let mut batch = initial;
        let mut stagger = match self.config.acc_delays {
            Some((min, max)) => Stagger::RandomSecs(min, max),
            None => Stagger::None,
        };

        info!(
            target: "task_result",
            "Starting {} accounts on {} workers",
            batch.len(),
            self.config.threads
        );

        while !batch.is_empty() && !self.cancel.is_cancelled() {
            let wave = summary.waves.len() + 1;
            let report = self.run_wave(wave, batch, processor.clone(), stagger).await;
            summary.waves.push(report);

            if self.cancel.is_cancelled() || !self.coordinator.should_continue() {
                break;
            }

            batch = self.coordinator.retry_batch();
            stagger = Stagger::Fixed(self.config.retry_delay);
            info!(
                target: "task_result",
                "Retrying {} accounts. Success rate: {:.2}%",
                batch.len(),
                self.coordinator.success_rate() * 100.0
            );
        }

        summary.accounts = self.coordinator.summary();
        summary.cancelled = self.cancel.is_cancelled();
        summary.duration = start_time.elapsed();
        summary
    }
}

/// Cancels `token` on Ctrl+C.
pub fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Received Ctrl+C. Finishing in-flight accounts...");
                token.cancel();
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });
}
