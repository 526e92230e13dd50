//! Ordered execution of an account's claim tasks.

use crate::account::Account;
use crate::config::SequencerConfig;
use crate::metrics::MetricsCollector;
use crate::session::SessionAuthenticator;
use crate::traits::{ApiSession, ClaimTask, TaskOutcome};
use crate::utils::retry::sleep_or_cancel;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Done,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub required: bool,
    /// Times the task's remote operation was invoked.
    pub invocations: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub tasks: SmallVec<[TaskReport; 8]>,
    pub reauthentications: u32,
    pub cancelled: bool,
    /// Token in effect when the sequence ended.
    pub final_token: Option<String>,
}

impl SequenceReport {
    /// True when no required task failed and the sequence ran to completion.
    pub fn success(&self) -> bool {
        !self.cancelled && self.failed_tasks().is_empty()
    }

    /// Required tasks that ended `Failed`.
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.required && matches!(t.status, TaskStatus::Failed(_)))
            .map(|t| t.name.as_str())
            .collect()
    }
}

pub struct TaskSequencer<S> {
    tasks: Vec<Arc<dyn ClaimTask<S>>>,
    authenticator: Arc<SessionAuthenticator>,
    config: SequencerConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<S: ApiSession> TaskSequencer<S> {
    pub fn new(
        tasks: Vec<Arc<dyn ClaimTask<S>>>,
        authenticator: Arc<SessionAuthenticator>,
        config: SequencerConfig,
    ) -> Self {
        Self {
            tasks,
            authenticator,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Runs every task in order. A failing task never stops the sequence; an
    /// expired token is refreshed at most once per task and only that task is
    /// retried.
    pub async fn run(
        &self,
        session: &mut S,
        account: &Account,
        token: String,
        cancel: &CancellationToken,
    ) -> SequenceReport {
        let mut report = SequenceReport::default();
        let mut token = token;

        for task in &self.tasks {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let started = Instant::now();
            let mut refreshed = false;
            let mut rate_limit_hits = 0u32;
            let mut invocations = 0u32;

            let status = loop {
                invocations += 1;
                match task.run(session, account, &token).await {
                    TaskOutcome::Success => break TaskStatus::Done,
                    TaskOutcome::AlreadySatisfied => break TaskStatus::Skipped,
                    TaskOutcome::Failed(reason) => break TaskStatus::Failed(reason),
                    TaskOutcome::AuthExpired if refreshed => {
                        break TaskStatus::Failed("authorization rejected after refresh".to_string())
                    }
                    TaskOutcome::AuthExpired => {
                        refreshed = true;
                        match self.authenticator.refresh(session, account, cancel).await {
                            Ok(fresh) => {
                                report.reauthentications += 1;
                                token = fresh;
                            }
                            Err(e) => break TaskStatus::Failed(format!("re-authentication failed: {}", e)),
                        }
                    }
                    TaskOutcome::RateLimited if rate_limit_hits >= self.config.rate_limit_retries => {
                        break TaskStatus::Failed("rate limited".to_string())
                    }
                    TaskOutcome::RateLimited => {
                        rate_limit_hits += 1;
                        debug!(
                            "{} | {} rate limited ({}/{})",
                            account,
                            task.name(),
                            rate_limit_hits,
                            self.config.rate_limit_retries
                        );
                        self.authenticator.rotate_after_rate_limit(session);
                        if !sleep_or_cancel(self.config.rate_limit_pause, cancel).await {
                            report.cancelled = true;
                            break TaskStatus::Failed("cancelled".to_string());
                        }
                    }
                }
            };

            match &status {
                TaskStatus::Done => info!(target: "task_result", "{} | {} SUCCESS", account, task.name()),
                TaskStatus::Skipped => info!(target: "task_result", "{} | {} SKIPPED", account, task.name()),
                TaskStatus::Failed(reason) if task.required() => {
                    info!(target: "task_result", "{} | {} FAILED: {}", account, task.name(), reason)
                }
                TaskStatus::Failed(reason) => info!(
                    target: "task_result",
                    "{} | {} FAILED (optional): {}",
                    account,
                    task.name(),
                    reason
                ),
            }
            if let Some(m) = &self.metrics {
                m.record_task(task.name(), started.elapsed(), &status);
            }

            report.tasks.push(TaskReport {
                name: task.name().to_string(),
                status,
                required: task.required(),
                invocations,
            });

            if report.cancelled {
                break;
            }
        }

        report.final_token = Some(token);
        report
    }
}
