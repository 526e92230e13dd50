mod common;

use async_trait::async_trait;
use common::*;
use core_logic::{
    Account, AuthConfig, ClaimTask, CredentialCache, MetricsCollector, ProxyRotator,
    SequencerConfig, SessionAuthenticator, TaskOutcome, TaskSequencer, TaskStatus,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Task that pops a scripted outcome per call and remembers the tokens it saw.
struct ScriptedTask {
    name: &'static str,
    outcomes: Mutex<VecDeque<TaskOutcome>>,
    calls: AtomicU32,
    tokens: Mutex<Vec<String>>,
    required: bool,
}

impl ScriptedTask {
    fn new(name: &'static str, outcomes: Vec<TaskOutcome>) -> Arc<Self> {
        Arc::new(Self::build(name, outcomes, true))
    }

    fn optional(name: &'static str, outcomes: Vec<TaskOutcome>) -> Arc<Self> {
        Arc::new(Self::build(name, outcomes, false))
    }

    fn build(name: &'static str, outcomes: Vec<TaskOutcome>, required: bool) -> Self {
        Self {
            name,
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
            tokens: Mutex::new(Vec::new()),
            required,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClaimTask<FakeSession> for ScriptedTask {
    fn name(&self) -> &str {
        self.name
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn run(&self, _session: &mut FakeSession, _account: &Account, token: &str) -> TaskOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_string());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TaskOutcome::Success)
    }
}

fn authenticator() -> Arc<SessionAuthenticator> {
    Arc::new(SessionAuthenticator::new(
        Arc::new(CredentialCache::new()),
        Arc::new(ProxyRotator::new(vec![])),
        AuthConfig::default(),
    ))
}

fn sequencer(tasks: Vec<Arc<ScriptedTask>>) -> TaskSequencer<FakeSession> {
    let tasks: Vec<Arc<dyn ClaimTask<FakeSession>>> = tasks
        .into_iter()
        .map(|t| t as Arc<dyn ClaimTask<FakeSession>>)
        .collect();
    TaskSequencer::new(tasks, authenticator(), SequencerConfig::default())
}

#[tokio::test]
async fn test_auth_expired_mid_sequence_refreshes_once() {
    let daily = ScriptedTask::new("daily", vec![TaskOutcome::Success]);
    let onboarding = ScriptedTask::new("onboarding", vec![TaskOutcome::AlreadySatisfied]);
    let quests = ScriptedTask::new("quests", vec![TaskOutcome::AuthExpired, TaskOutcome::Success]);
    let info = ScriptedTask::new("info", vec![TaskOutcome::Success]);

    let fresh = token_expiring_in(60);
    let mut session = FakeSession::with_login_token(&fresh);
    let acc = account(1, "0xA");

    let report = sequencer(vec![daily.clone(), onboarding.clone(), quests.clone(), info.clone()])
        .run(&mut session, &acc, "stale".to_string(), &CancellationToken::new())
        .await;

    assert_eq!(session.logins, 1);
    assert_eq!(report.reauthentications, 1);
    assert_eq!(daily.calls(), 1);
    assert_eq!(onboarding.calls(), 1);
    assert_eq!(quests.calls(), 2);
    assert_eq!(info.calls(), 1);

    assert_eq!(*quests.tokens.lock().unwrap(), vec!["stale".to_string(), fresh.clone()]);
    assert_eq!(*info.tokens.lock().unwrap(), vec![fresh.clone()]);
    assert_eq!(report.final_token, Some(fresh));
    assert!(report.success());

    let statuses: Vec<&TaskStatus> = report.tasks.iter().map(|t| &t.status).collect();
    assert_eq!(
        statuses,
        vec![
            &TaskStatus::Done,
            &TaskStatus::Skipped,
            &TaskStatus::Done,
            &TaskStatus::Done
        ]
    );
}

#[tokio::test]
async fn test_second_auth_expiry_fails_only_that_task() {
    let quests = ScriptedTask::new(
        "quests",
        vec![TaskOutcome::AuthExpired, TaskOutcome::AuthExpired],
    );
    let info = ScriptedTask::new("info", vec![TaskOutcome::Success]);
    let mut session = FakeSession::default();

    let report = sequencer(vec![quests.clone(), info.clone()])
        .run(&mut session, &account(1, "0xA"), "t".to_string(), &CancellationToken::new())
        .await;

    assert_eq!(session.logins, 1);
    assert_eq!(quests.calls(), 2);
    assert_eq!(info.calls(), 1);
    assert!(!report.success());
    assert_eq!(report.failed_tasks(), vec!["quests"]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_task_retried_within_budget() {
    let daily = ScriptedTask::new(
        "daily",
        vec![TaskOutcome::RateLimited, TaskOutcome::RateLimited, TaskOutcome::Success],
    );
    let roulette = ScriptedTask::new("roulette", vec![TaskOutcome::RateLimited; 10]);
    let metrics = Arc::new(MetricsCollector::default());
    let mut session = FakeSession::default();

    let report = sequencer(vec![daily.clone(), roulette.clone()])
        .with_metrics(metrics.clone())
        .run(&mut session, &account(1, "0xA"), "t".to_string(), &CancellationToken::new())
        .await;

    assert_eq!(daily.calls(), 3);
    // one initial call plus the configured retries
    assert_eq!(roulette.calls(), 1 + SequencerConfig::default().rate_limit_retries);
    assert_eq!(report.failed_tasks(), vec!["roulette"]);
    assert_eq!(session.logins, 0);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.per_task["daily"].done, 1);
    assert_eq!(snapshot.per_task["roulette"].failed, 1);
}

#[tokio::test]
async fn test_failed_task_does_not_stop_sequence() {
    let onboarding = ScriptedTask::new("onboarding", vec![TaskOutcome::Failed("400".into())]);
    let info = ScriptedTask::new("info", vec![TaskOutcome::Success]);
    let mut session = FakeSession::default();

    let report = sequencer(vec![onboarding.clone(), info.clone()])
        .run(&mut session, &account(1, "0xA"), "t".to_string(), &CancellationToken::new())
        .await;

    assert_eq!(info.calls(), 1);
    assert_eq!(report.tasks.len(), 2);
    assert_eq!(report.failed_tasks(), vec!["onboarding"]);
}

#[tokio::test]
async fn test_optional_task_failure_keeps_attempt_successful() {
    let onboarding = ScriptedTask::optional("onboarding", vec![TaskOutcome::Failed("400".into())]);
    let daily = ScriptedTask::new("daily", vec![TaskOutcome::Success]);
    let tournament = ScriptedTask::optional("tournament", vec![TaskOutcome::Failed("closed".into())]);
    let mut session = FakeSession::default();

    let report = sequencer(vec![onboarding.clone(), daily.clone(), tournament.clone()])
        .run(&mut session, &account(1, "0xA"), "t".to_string(), &CancellationToken::new())
        .await;

    assert_eq!(daily.calls(), 1);
    assert_eq!(tournament.calls(), 1);
    assert!(report.success());
    assert!(report.failed_tasks().is_empty());
    assert!(!report.tasks[0].required);
    assert_eq!(report.tasks[2].status, TaskStatus::Failed("closed".into()));
}

#[tokio::test]
async fn test_cancelled_sequence_stops_before_next_task() {
    let daily = ScriptedTask::new("daily", vec![TaskOutcome::Success]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut session = FakeSession::default();

    let report = sequencer(vec![daily.clone()])
        .run(&mut session, &account(1, "0xA"), "t".to_string(), &cancel)
        .await;

    assert!(report.cancelled);
    assert_eq!(daily.calls(), 0);
}
