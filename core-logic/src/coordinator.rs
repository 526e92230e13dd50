//! Per-account attempt bookkeeping and the wave stopping rule.

use crate::account::Account;
use crate::account_ledger::AccountLedger;
use crate::traits::AttemptOutcome;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AccountState {
    Pending,
    InProgress,
    /// Failed at least once, still eligible for another wave.
    Failed(String),
    Succeeded,
    Exhausted(String),
}

impl AccountState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountState::Succeeded | AccountState::Exhausted(_))
    }
}

#[derive(Debug, Clone)]
pub struct AccountRunState {
    pub account: Account,
    pub attempts: u32,
    pub state: AccountState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub success_rate: f64,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    accounts: HashMap<String, AccountRunState>,
}

pub struct RetryCoordinator {
    max_attempts: u32,
    success_threshold: f64,
    inner: Mutex<Inner>,
    failure_ledger: Option<Arc<AccountLedger>>,
    success_ledger: Option<Arc<AccountLedger>>,
}

impl RetryCoordinator {
    pub fn new(max_attempts: u32, success_threshold: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            success_threshold,
            inner: Mutex::new(Inner::default()),
            failure_ledger: None,
            success_ledger: None,
        }
    }

    pub fn with_failure_ledger(mut self, ledger: Arc<AccountLedger>) -> Self {
        self.failure_ledger = Some(ledger);
        self
    }

    pub fn with_success_ledger(mut self, ledger: Arc<AccountLedger>) -> Self {
        self.success_ledger = Some(ledger);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Adds accounts as `Pending`. Already known accounts are left untouched.
    pub fn register(&self, accounts: &[Account]) {
        let mut inner = self.lock();
        for account in accounts {
            let key = key(account);
            if inner.accounts.contains_key(&key) {
                continue;
            }
            inner.order.push(key.clone());
            inner.accounts.insert(
                key,
                AccountRunState {
                    account: account.clone(),
                    attempts: 0,
                    state: AccountState::Pending,
                },
            );
        }
    }

    /// Moves a non-terminal account to `InProgress`, registering it first if
    /// it is unknown. Returns the number of failed attempts recorded so far,
    /// or `None` if the account is terminal.
    pub fn begin_attempt(&self, account: &Account) -> Option<u32> {
        let mut inner = self.lock();
        let entry = entry_mut(&mut inner, account);
        if entry.state.is_terminal() {
            return None;
        }
        entry.state = AccountState::InProgress;
        Some(entry.attempts)
    }

    /// Returns an interrupted `InProgress` account to the queue without
    /// counting the attempt.
    pub fn abandon_attempt(&self, account: &Account) {
        let mut inner = self.lock();
        if let Some(entry) = inner.accounts.get_mut(&key(account)) {
            if entry.state == AccountState::InProgress {
                entry.state = if entry.attempts == 0 {
                    AccountState::Pending
                } else {
                    AccountState::Failed("interrupted".to_string())
                };
            }
        }
    }

    /// Applies one attempt's outcome and returns the resulting state.
    ///
    /// Reports for accounts already `Succeeded` or `Exhausted` are ignored.
    /// A newly exhausted account is written to the failure ledger exactly once,
    /// a newly succeeded one to the success ledger.
    pub async fn record_outcome(&self, account: &Account, outcome: &AttemptOutcome) -> AccountState {
        let (state, newly_exhausted) = {
            let mut inner = self.lock();
            let entry = entry_mut(&mut inner, account);

            if entry.state.is_terminal() {
                debug!("Ignoring late outcome for {} ({:?})", account, entry.state);
                return entry.state.clone();
            }

            let mut newly_exhausted = false;
            match outcome {
                AttemptOutcome::Success => entry.state = AccountState::Succeeded,
                AttemptOutcome::Failure(reason) => {
                    entry.attempts = (entry.attempts + 1).min(self.max_attempts);
                    if entry.attempts >= self.max_attempts {
                        entry.state = AccountState::Exhausted(reason.clone());
                        newly_exhausted = true;
                    } else {
                        entry.state = AccountState::Failed(reason.clone());
                    }
                }
            }
            (entry.state.clone(), newly_exhausted)
        };

        if newly_exhausted {
            error!(target: "task_result", "{} | All attempts exhausted", account);
            if let Some(ledger) = &self.failure_ledger {
                if let Err(e) = ledger.record(account).await {
                    warn!("Failed to record exhausted account {}: {:#}", account, e);
                }
            }
        } else if state == AccountState::Succeeded {
            if let Some(ledger) = &self.success_ledger {
                if let Err(e) = ledger.record(account).await {
                    warn!("Failed to record succeeded account {}: {:#}", account, e);
                }
            }
        }
        state
    }

    /// Accounts eligible for another wave, in registration order.
    pub fn retry_batch(&self) -> Vec<Account> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|k| inner.accounts.get(k))
            .filter(|s| {
                matches!(s.state, AccountState::Pending | AccountState::Failed(_))
                    && s.attempts < self.max_attempts
            })
            .map(|s| s.account.clone())
            .collect()
    }

    /// `succeeded / (succeeded + failed-and-not-succeeded)`, 0 when nothing
    /// has been counted yet.
    pub fn success_rate(&self) -> f64 {
        let inner = self.lock();
        let (succeeded, failed) = counts(&inner);
        let total = succeeded + failed;
        if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        }
    }

    pub fn should_continue(&self) -> bool {
        self.success_rate() < self.success_threshold && !self.retry_batch().is_empty()
    }

    pub fn attempts(&self, account: &Account) -> u32 {
        self.lock()
            .accounts
            .get(&key(account))
            .map(|s| s.attempts)
            .unwrap_or(0)
    }

    pub fn state(&self, account: &Account) -> Option<AccountState> {
        self.lock().accounts.get(&key(account)).map(|s| s.state.clone())
    }

    pub fn exhausted(&self) -> Vec<Account> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|k| inner.accounts.get(k))
            .filter(|s| matches!(s.state, AccountState::Exhausted(_)))
            .map(|s| s.account.clone())
            .collect()
    }

    pub fn summary(&self) -> CoordinatorSummary {
        let inner = self.lock();
        let (succeeded, failed) = counts(&inner);
        let exhausted = inner
            .accounts
            .values()
            .filter(|s| matches!(s.state, AccountState::Exhausted(_)))
            .count();
        let counted = succeeded + failed;
        CoordinatorSummary {
            total: inner.accounts.len(),
            succeeded,
            failed,
            exhausted,
            success_rate: if counted == 0 {
                0.0
            } else {
                succeeded as f64 / counted as f64
            },
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn entry_mut<'a>(inner: &'a mut Inner, account: &Account) -> &'a mut AccountRunState {
    let key = key(account);
    if !inner.accounts.contains_key(&key) {
        inner.order.push(key.clone());
    }
    inner.accounts.entry(key).or_insert_with(|| AccountRunState {
        account: account.clone(),
        attempts: 0,
        state: AccountState::Pending,
    })
}

fn counts(inner: &Inner) -> (usize, usize) {
    inner
        .accounts
        .values()
        .fold((0, 0), |(ok, failed), s| match s.state {
            AccountState::Succeeded => (ok + 1, failed),
            AccountState::Failed(_) | AccountState::Exhausted(_) => (ok, failed + 1),
            AccountState::InProgress | AccountState::Pending if s.attempts > 0 => (ok, failed + 1),
            _ => (ok, failed),
        })
}

fn key(account: &Account) -> String {
    account.address.to_lowercase()
}
