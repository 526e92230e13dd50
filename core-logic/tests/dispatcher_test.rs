use async_trait::async_trait;
use core_logic::{
    Account, AccountLedger, AccountProcessor, AccountState, AttemptOutcome, ConcurrentDispatcher,
    DispatchConfig, PrivateKey, RateLimiter, RetryCoordinator, Stagger, WorkerContext,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn account(index: usize, addr: &str) -> Account {
    Account::new(index, addr, PrivateKey::new(format!("0x{:064x}", index)).unwrap())
}

/// Replays a scripted outcome per attempt, keyed by address.
struct ScriptedProcessor {
    script: HashMap<String, Vec<AttemptOutcome>>,
    calls: Mutex<Vec<(String, u32)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    work: Duration,
}

impl ScriptedProcessor {
    fn new(script: &[(&str, Vec<AttemptOutcome>)]) -> Self {
        Self {
            script: script
                .iter()
                .map(|(a, o)| (a.to_string(), o.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            work: Duration::ZERO,
        }
    }

    fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    fn calls_for(&self, addr: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == addr)
            .count()
    }
}

#[async_trait]
impl AccountProcessor for ScriptedProcessor {
    async fn process(&self, account: &Account, ctx: &WorkerContext) -> AttemptOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((account.address.clone(), ctx.attempt));

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.script
            .get(&account.address)
            .and_then(|s| s.get(ctx.attempt as usize))
            .cloned()
            .unwrap_or_else(|| AttemptOutcome::Failure("unscripted".to_string()))
    }
}

fn dispatcher(
    threads: usize,
    coordinator: Arc<RetryCoordinator>,
    cancel: CancellationToken,
) -> ConcurrentDispatcher {
    let config = DispatchConfig {
        threads,
        max_attempts: coordinator.max_attempts(),
        success_threshold: 0.9,
        acc_delays: None,
        retry_delay: Duration::ZERO,
    };
    ConcurrentDispatcher::new(
        config,
        coordinator,
        Arc::new(RateLimiter::new(Duration::ZERO)),
        cancel,
    )
}

#[tokio::test]
async fn test_three_accounts_converge_in_two_waves() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(
        AccountLedger::open("failure", dir.path().join("failure_accounts.txt"))
            .await
            .unwrap(),
    );
    let coordinator = Arc::new(RetryCoordinator::new(2, 0.9).with_failure_ledger(ledger.clone()));
    let processor = Arc::new(ScriptedProcessor::new(&[
        ("0xA", vec![AttemptOutcome::Success]),
        (
            "0xB",
            vec![AttemptOutcome::Failure("500".into()), AttemptOutcome::Success],
        ),
        (
            "0xC",
            vec![
                AttemptOutcome::Failure("500".into()),
                AttemptOutcome::Failure("500".into()),
            ],
        ),
    ]));

    let accounts = vec![account(1, "0xA"), account(2, "0xB"), account(3, "0xC")];
    let summary = dispatcher(2, coordinator.clone(), CancellationToken::new())
        .run_until_converged(accounts.clone(), processor.clone())
        .await;

    assert_eq!(summary.waves.len(), 2);
    assert_eq!(summary.waves[0].submitted, 3);
    assert_eq!(summary.waves[1].submitted, 2);
    assert!((coordinator.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    assert!(!coordinator.should_continue());

    let exhausted: Vec<String> = coordinator
        .exhausted()
        .into_iter()
        .map(|a| a.address)
        .collect();
    assert_eq!(exhausted, vec!["0xC".to_string()]);

    assert_eq!(processor.calls_for("0xA"), 1);
    assert_eq!(processor.calls_for("0xB"), 2);
    assert_eq!(processor.calls_for("0xC"), 2);

    let failed = ledger.load().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].address, "0xC");
}

#[tokio::test(start_paused = true)]
async fn test_pool_never_exceeds_thread_count() {
    let coordinator = Arc::new(RetryCoordinator::new(1, 0.9));
    let addrs: Vec<String> = (0..8).map(|i| format!("0x{:02}", i)).collect();
    let script: Vec<(&str, Vec<AttemptOutcome>)> = addrs
        .iter()
        .map(|a| (a.as_str(), vec![AttemptOutcome::Success]))
        .collect();
    let processor =
        Arc::new(ScriptedProcessor::new(&script).with_work(Duration::from_millis(500)));

    let accounts: Vec<Account> = addrs
        .iter()
        .enumerate()
        .map(|(i, a)| account(i + 1, a))
        .collect();
    let summary = dispatcher(3, coordinator.clone(), CancellationToken::new())
        .run_until_converged(accounts, processor.clone())
        .await;

    assert_eq!(summary.waves.len(), 1);
    assert_eq!(summary.accounts.succeeded, 8);
    assert!(processor.peak.load(Ordering::SeqCst) <= 3);
    assert!(processor.peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_cancelled_run_submits_nothing() {
    let coordinator = Arc::new(RetryCoordinator::new(3, 0.9));
    let processor = Arc::new(ScriptedProcessor::new(&[(
        "0xA",
        vec![AttemptOutcome::Success],
    )]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = dispatcher(2, coordinator.clone(), cancel)
        .run_until_converged(vec![account(1, "0xA")], processor.clone())
        .await;

    assert!(summary.cancelled);
    assert!(summary.waves.is_empty());
    assert_eq!(processor.calls_for("0xA"), 0);
    assert_eq!(coordinator.attempts(&account(1, "0xA")), 0);
    assert_eq!(
        coordinator.state(&account(1, "0xA")),
        Some(AccountState::Pending)
    );
}

#[tokio::test]
async fn test_standalone_wave_registers_its_accounts() {
    let coordinator = Arc::new(RetryCoordinator::new(3, 0.9));
    let processor = Arc::new(ScriptedProcessor::new(&[
        ("0xA", vec![AttemptOutcome::Success]),
        ("0xB", vec![AttemptOutcome::Failure("500".into())]),
    ]));

    let report = dispatcher(2, coordinator.clone(), CancellationToken::new())
        .run_wave(
            1,
            vec![account(1, "0xA"), account(2, "0xB")],
            processor.clone(),
            Stagger::None,
        )
        .await;

    assert_eq!(report.submitted, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(processor.calls_for("0xA"), 1);
    assert_eq!(processor.calls_for("0xB"), 1);
    assert!((coordinator.success_rate() - 0.5).abs() < 1e-9);
    assert_eq!(coordinator.retry_batch(), vec![account(2, "0xB")]);
}
