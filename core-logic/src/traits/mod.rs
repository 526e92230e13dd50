use crate::account::{Account, PrivateKey};
use crate::config::ProxyConfig;
use crate::credentials::Credentials;
use crate::error::{ApiError, WalletError};
use crate::utils::rate_limiter::RateLimiter;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Classified result of one claim operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// Nothing to do (already claimed, already registered, below threshold).
    AlreadySatisfied,
    RateLimited,
    AuthExpired,
    Failed(String),
}

impl TaskOutcome {
    pub fn from_api_error(error: &ApiError) -> Self {
        match error {
            ApiError::RateLimited { .. } => TaskOutcome::RateLimited,
            ApiError::AuthExpired { .. } => TaskOutcome::AuthExpired,
            other => TaskOutcome::Failed(other.to_string()),
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Success => write!(f, "SUCCESS"),
            TaskOutcome::AlreadySatisfied => write!(f, "SKIPPED"),
            TaskOutcome::RateLimited => write!(f, "RATE LIMIT"),
            TaskOutcome::AuthExpired => write!(f, "AUTH EXPIRED"),
            TaskOutcome::Failed(reason) => write!(f, "FAILED ({})", reason),
        }
    }
}

/// Result of one full pass over an account, reported to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

/// One account's connection to the remote API: transport bound to a proxy,
/// identity headers, and a cookie jar that survives proxy switches.
#[async_trait]
pub trait ApiSession: Send {
    fn proxy(&self) -> Option<&ProxyConfig>;

    /// Rebuilds the transport on another proxy, keeping cookies.
    fn switch_proxy(&mut self, proxy: Option<ProxyConfig>) -> Result<(), ApiError>;

    /// Seeds the cookie jar from cached credentials.
    fn restore(&mut self, credentials: &Credentials);

    /// Cheap authenticated call used to accept cached credentials.
    async fn probe(&mut self, account: &Account, token: &str) -> Result<(), ApiError>;

    /// Full challenge-response login, one pass over every step.
    async fn login(&mut self, account: &Account) -> Result<Credentials, ApiError>;
}

pub trait SessionFactory: Send + Sync {
    type Session: ApiSession;

    /// New session for one account attempt on the worker described by `worker`.
    fn create(&self, worker: &WorkerContext, proxy: Option<ProxyConfig>) -> Result<Self::Session, ApiError>;
}

#[async_trait]
pub trait ClaimTask<S>: Send + Sync {
    /// Returns the name of the task
    fn name(&self) -> &str;

    /// Whether a failure of this task fails the whole attempt. Optional tasks
    /// are still run and reported, but their failures are only logged.
    fn required(&self) -> bool {
        true
    }

    /// Executes the task with the current bearer token
    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome;
}

/// Per-attempt execution context handed out by the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub slot: usize,
    /// Failed attempts recorded for this account before this one.
    pub attempt: u32,
    pub cancel: CancellationToken,
    pub limiter: Arc<RateLimiter>,
}

impl WorkerContext {
    pub fn is_first_attempt(&self) -> bool {
        self.attempt == 0
    }

    /// Waits for this slot's next request turn. `false` once cancelled.
    pub async fn pace(&self) -> bool {
        self.limiter.wait_turn(self.slot, &self.cancel).await
    }
}

#[async_trait]
pub trait AccountProcessor: Send + Sync {
    async fn process(&self, account: &Account, ctx: &WorkerContext) -> AttemptOutcome;
}

#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Solves one anti-bot challenge; `None` when the provider gave up.
    async fn solve(&self) -> Option<String>;
}

/// Wallet signing collaborator. Pure: no side effects.
pub trait MessageSigner: Send + Sync {
    fn sign_message(&self, message: &str, key: &PrivateKey) -> Result<String, WalletError>;

    fn address_of(&self, key: &PrivateKey) -> Result<String, WalletError>;
}
