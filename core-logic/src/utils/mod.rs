//! # Utilities Module
//!
//! Pacing, proxy rotation, retry helpers and log setup.

pub mod logger;
pub mod proxy_rotator;
pub mod rate_limiter;
pub mod retry;

pub use logger::{setup_logger, LogConfig};
pub use proxy_rotator::{parse_proxy_line, ProxyRotator};
pub use rate_limiter::RateLimiter;
pub use retry::{sleep_or_cancel, with_retry, RetryConfig, RetryError};
