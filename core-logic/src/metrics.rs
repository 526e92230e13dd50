use crate::coordinator::AccountState;
use crate::sequencer::TaskStatus;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_secs: u64,
    pub waves: u64,
    pub accounts: AccountMetrics,
    pub tasks: TaskMetrics,
    pub per_task: BTreeMap<String, TaskCounters>,
    pub performance: PerformanceMetrics,
    pub logins: LoginMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountMetrics {
    pub succeeded: u64,
    pub failed: u64,
    pub exhausted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub total: u64,
    pub success: u64,
    pub skipped: u64,
    pub failed: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskCounters {
    pub done: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_duration_ms: u64,
    pub avg_task_duration_ms: f64,
    pub min_task_duration_ms: u64,
    pub max_task_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginMetrics {
    pub cached: u64,
    pub fresh: u64,
}

/// Run-wide counters shared by the dispatcher, sequencer and authenticator.
#[derive(Debug)]
pub struct MetricsCollector {
    waves: AtomicU64,
    accounts_succeeded: AtomicU64,
    accounts_failed: AtomicU64,
    accounts_exhausted: AtomicU64,
    tasks_total: AtomicU64,
    tasks_success: AtomicU64,
    tasks_skipped: AtomicU64,
    tasks_failed: AtomicU64,
    task_duration_sum_ms: AtomicU64,
    task_min_duration_ms: AtomicU64,
    task_max_duration_ms: AtomicU64,
    logins_cached: AtomicU64,
    logins_fresh: AtomicU64,
    per_task: Mutex<BTreeMap<String, TaskCounters>>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            waves: AtomicU64::new(0),
            accounts_succeeded: AtomicU64::new(0),
            accounts_failed: AtomicU64::new(0),
            accounts_exhausted: AtomicU64::new(0),
            tasks_total: AtomicU64::new(0),
            tasks_success: AtomicU64::new(0),
            tasks_skipped: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            task_duration_sum_ms: AtomicU64::new(0),
            task_min_duration_ms: AtomicU64::new(u64::MAX),
            task_max_duration_ms: AtomicU64::new(0),
            logins_cached: AtomicU64::new(0),
            logins_fresh: AtomicU64::new(0),
            per_task: Mutex::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }
}

impl MetricsCollector {
    pub fn record_task(&self, name: &str, duration: Duration, status: &TaskStatus) {
        self.tasks_total.fetch_add(1, Ordering::SeqCst);

        let duration_ms = duration.as_millis() as u64;
        self.task_duration_sum_ms
            .fetch_add(duration_ms, Ordering::SeqCst);
        self.task_min_duration_ms
            .fetch_min(duration_ms, Ordering::SeqCst);
        self.task_max_duration_ms
            .fetch_max(duration_ms, Ordering::SeqCst);

        let mut per_task = self.per_task.lock().unwrap_or_else(|p| p.into_inner());
        let counters = per_task.entry(name.to_string()).or_default();
        match status {
            TaskStatus::Done => {
                self.tasks_success.fetch_add(1, Ordering::SeqCst);
                counters.done += 1;
            }
            TaskStatus::Skipped => {
                self.tasks_skipped.fetch_add(1, Ordering::SeqCst);
                counters.skipped += 1;
            }
            TaskStatus::Failed(_) => {
                self.tasks_failed.fetch_add(1, Ordering::SeqCst);
                counters.failed += 1;
            }
        }
    }

    pub fn record_login(&self, from_cache: bool) {
        if from_cache {
            self.logins_cached.fetch_add(1, Ordering::SeqCst);
        } else {
            self.logins_fresh.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts one recorded attempt by the state it left the account in.
    pub fn record_account(&self, state: &AccountState) {
        let counter = match state {
            AccountState::Succeeded => &self.accounts_succeeded,
            AccountState::Exhausted(_) => &self.accounts_exhausted,
            AccountState::Failed(_) => &self.accounts_failed,
            AccountState::Pending | AccountState::InProgress => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_wave(&self) {
        self.waves.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_tasks = self.tasks_total.load(Ordering::SeqCst);
        let total_duration = self.task_duration_sum_ms.load(Ordering::SeqCst);
        let min_duration = self.task_min_duration_ms.load(Ordering::SeqCst);
        let max_duration = self.task_max_duration_ms.load(Ordering::SeqCst);
        let total_success = self.tasks_success.load(Ordering::SeqCst);
        let total_skipped = self.tasks_skipped.load(Ordering::SeqCst);

        let per_task = self
            .per_task
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|p| p.into_inner().clone());

        MetricsSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            uptime_secs: self.uptime().as_secs(),
            waves: self.waves.load(Ordering::SeqCst),
            accounts: AccountMetrics {
                succeeded: self.accounts_succeeded.load(Ordering::SeqCst),
                failed: self.accounts_failed.load(Ordering::SeqCst),
                exhausted: self.accounts_exhausted.load(Ordering::SeqCst),
            },
            tasks: TaskMetrics {
                total: total_tasks,
                success: total_success,
                skipped: total_skipped,
                failed: self.tasks_failed.load(Ordering::SeqCst),
                // skipped tasks count as satisfied
                success_rate: if total_tasks > 0 {
                    (total_success + total_skipped) as f64 / total_tasks as f64 * 100.0
                } else {
                    0.0
                },
            },
            per_task,
            performance: PerformanceMetrics {
                total_duration_ms: total_duration,
                avg_task_duration_ms: if total_tasks > 0 {
                    total_duration as f64 / total_tasks as f64
                } else {
                    0.0
                },
                min_task_duration_ms: if min_duration == u64::MAX {
                    0
                } else {
                    min_duration
                },
                max_task_duration_ms: max_duration,
            },
            logins: LoginMetrics {
                cached: self.logins_cached.load(Ordering::SeqCst),
                fresh: self.logins_fresh.load(Ordering::SeqCst),
            },
        }
    }

    pub fn to_json(&self) -> String {
        let snapshot = self.snapshot();
        serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }

    pub async fn export_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json();
        tokio::fs::write(path, json).await
    }

    pub fn tasks_total(&self) -> u64 {
        self.tasks_total.load(Ordering::SeqCst)
    }

    pub fn tasks_success(&self) -> u64 {
        self.tasks_success.load(Ordering::SeqCst)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
