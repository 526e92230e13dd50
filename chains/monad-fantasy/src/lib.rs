//! Monad Fantasy - claim bot for the fantasy.top game on Monad
//!
//! Runs every account from the keys file through login and a fixed list of
//! claim tasks, using the orchestration machinery in `core_logic`.
//!
//! # Architecture
//!
//! - **[`api::HttpSession`]**: reqwest client per account attempt with proxy,
//!   browser identity headers, cookie jar and Privy sign-in
//! - **[`tasks`]**: onboarding, daily, fragment, quest, info, roulette and
//!   tournament claims behind the [`api::GameApi`] seam
//! - **[`processor::FantasyProcessor`]**: session, authentication and task
//!   sequence for one account attempt
//! - **[`context::AppContext`]**: ledger, caches, rotator, limiter and
//!   cancellation shared by a run
//!
//! # Quick Start
//!
//! ```bash
//! # Process every account in data/keys.txt
//! cargo run -p monad-fantasy
//!
//! # Reprocess accounts that exhausted their attempts last time
//! cargo run -p monad-fantasy -- retry-failures
//!
//! # Show what the ledger recorded
//! cargo run -p monad-fantasy -- results
//! ```

pub mod api;
pub mod captcha;
pub mod config;
pub mod context;
pub mod deck;
pub mod processor;
pub mod proxy_health;
pub mod signer;
pub mod tasks;

pub use config::FantasyConfig;
pub use context::AppContext;
pub use processor::FantasyProcessor;
