//! # Core Error Types
//!
//! Centralized error definitions for the core-logic crate.
//! Remote failures are classified once, at the HTTP boundary, into [`ApiError`]
//! so the orchestration layers can branch on the class instead of on strings.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration field: '{field}'")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("I/O error reading {path}: {msg}")]
    IoError { path: String, msg: String },
}

/// Account file and key material errors
#[derive(Error, Debug, Clone)]
pub enum WalletError {
    #[error("Malformed account line {line}: expected 'private_key:address'")]
    MalformedLine { line: usize },

    #[error("Invalid private key format: expected hex string")]
    InvalidKeyFormat,

    #[error("Wallet address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: String, actual: String },

    #[error("No accounts found in {path}")]
    NoAccounts { path: String },
}

/// Ledger store errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection pool exhausted (max: {max_size})")]
    PoolExhausted { max_size: u32 },

    #[error("Transaction failed: {msg}")]
    TransactionFailed { msg: String },

    #[error("Corrupt record for {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
}

/// Classified failure of one remote call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Rate limited by {endpoint}")]
    RateLimited { endpoint: String },

    #[error("Authorization rejected by {endpoint}")]
    AuthExpired { endpoint: String },

    #[error("HTTP {status_code} from {endpoint}: {body}")]
    Rejected {
        status_code: u16,
        endpoint: String,
        body: String,
    },

    #[error("Transient failure talking to {endpoint}: {reason}")]
    Transient { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl ApiError {
    /// Maps a non-success HTTP status onto the error taxonomy.
    pub fn from_status(status_code: u16, endpoint: &str, body: &str) -> Self {
        let endpoint = endpoint.to_string();
        match status_code {
            401 => ApiError::AuthExpired { endpoint },
            429 => ApiError::RateLimited { endpoint },
            500..=599 => ApiError::Transient {
                endpoint,
                reason: format!("HTTP {}", status_code),
            },
            _ => ApiError::Rejected {
                status_code,
                endpoint,
                body: truncate(body, 200),
            },
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Hard 4xx rejections are never retried within the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::Transient { .. }
        )
    }
}

/// Authentication failures surfaced to the account processor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Login for {address} failed after {attempts} attempts: {last}")]
    Exhausted {
        address: String,
        attempts: u32,
        last: String,
    },

    #[error("Login for {address} rejected: {reason}")]
    Rejected { address: String, reason: String },

    #[error("Login cancelled")]
    Cancelled,
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
