//! # Core Logic - Account Orchestration for the Fantasy Claim Bot
//!
//! Game-agnostic machinery shared by the bot binary: credential caching,
//! per-slot pacing, proxy rotation, session authentication, ordered task
//! execution and the wave-based retry dispatcher.
//!
//! ## Modules
//!
//! - [`account`] - Wallet accounts and the keys file
//! - [`account_ledger`] - Succeeded and exhausted account files
//! - [`challenge`] - Shared anti-bot token pool
//! - [`config`] - Dispatch, auth and sequencer settings
//! - [`coordinator`] - Attempt bookkeeping and the stopping rule
//! - [`credentials`] - Bearer token and cookie cache
//! - [`database`] - SQLite ledger for results and credentials
//! - [`dispatcher`] - Worker slots and retry waves
//! - [`error`] - Typed error handling with thiserror
//! - [`metrics`] - Run counters and JSON export
//! - [`sequencer`] - Ordered claim tasks with auth refresh
//! - [`session`] - Cached reuse and bounded login
//! - [`traits`] - Seams implemented by the game client
//! - [`utils`] - Rate limiter, proxy rotator, retry, logger

pub mod account;
pub mod account_ledger;
pub mod challenge;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod sequencer;
pub mod session;
pub mod traits;
pub mod utils;

pub use account::{load_accounts, parse_accounts, Account, PrivateKey};
pub use account_ledger::AccountLedger;
pub use challenge::ChallengeTokenPool;
pub use config::{AuthConfig, DispatchConfig, ProxyConfig, SequencerConfig};
pub use coordinator::{AccountState, CoordinatorSummary, RetryCoordinator};
pub use credentials::{token_expiry, CredentialCache, Credentials};
pub use database::{LedgerStore, ResultRecord};
pub use dispatcher::{spawn_shutdown_listener, ConcurrentDispatcher, RunSummary, Stagger, WaveReport};
pub use error::{ApiError, AuthError, ConfigError, DatabaseError, WalletError};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use sequencer::{SequenceReport, TaskReport, TaskSequencer, TaskStatus};
pub use session::SessionAuthenticator;
pub use traits::{
    AccountProcessor, ApiSession, AttemptOutcome, ChallengeSolver, ClaimTask, MessageSigner,
    SessionFactory, TaskOutcome, WorkerContext,
};
pub use utils::{setup_logger, LogConfig, ProxyRotator, RateLimiter, RetryConfig};
