use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Host and port only, safe to log.
    pub fn endpoint(&self) -> &str {
        self.url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url)
    }
}

/// Worker pool and wave settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub threads: usize,
    pub max_attempts: u32,
    pub success_threshold: f64,
    /// Random stagger between first-wave submissions, in seconds.
    pub acc_delays: Option<(u64, u64)>,
    /// Fixed stagger between retry-wave submissions.
    pub retry_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            threads: 5,
            max_attempts: 3,
            success_threshold: 0.9,
            acc_delays: None,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(invalid("threads", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if !(self.success_threshold > 0.0 && self.success_threshold <= 1.0) {
            return Err(invalid("success_threshold", "must be in (0, 1]"));
        }
        if let Some((min, max)) = self.acc_delays {
            if min > max {
                return Err(invalid("acc_delays", "min delay is greater than max delay"));
            }
        }
        Ok(())
    }
}

/// Login retry policy and cached-credential acceptance rules.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub max_login_attempts: u32,
    pub login_retry_delay: Duration,
    /// A cached token is reused only while `exp - token_margin` is in the future.
    pub token_margin: Duration,
    pub required_cookies: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            login_retry_delay: Duration::from_secs(6),
            token_margin: Duration::from_secs(5 * 60),
            required_cookies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub rate_limit_retries: u32,
    pub rate_limit_pause: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            rate_limit_retries: 3,
            rate_limit_pause: Duration::from_secs(2),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
