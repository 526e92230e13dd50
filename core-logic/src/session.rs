//! Bearer-token lifecycle for one account: cached reuse, full login, refresh.

use crate::account::Account;
use crate::config::AuthConfig;
use crate::credentials::CredentialCache;
use crate::error::{ApiError, AuthError};
use crate::metrics::MetricsCollector;
use crate::traits::ApiSession;
use crate::utils::proxy_rotator::ProxyRotator;
use crate::utils::retry::{sleep_or_cancel, RetryConfig};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SessionAuthenticator {
    cache: Arc<CredentialCache>,
    rotator: Arc<ProxyRotator>,
    config: AuthConfig,
    /// Wallets whose stored credentials were rejected during this run.
    stored_failed: Mutex<HashSet<String>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SessionAuthenticator {
    pub fn new(cache: Arc<CredentialCache>, rotator: Arc<ProxyRotator>, config: AuthConfig) -> Self {
        Self {
            cache,
            rotator,
            config,
            stored_failed: Mutex::new(HashSet::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns a usable bearer token for `account`.
    ///
    /// Cached credentials are only considered on the account's first attempt of
    /// the run and only while they have not been rejected earlier in the run.
    pub async fn authenticate<S: ApiSession>(
        &self,
        session: &mut S,
        account: &Account,
        first_attempt: bool,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        if first_attempt && !self.stored_credentials_failed(account) {
            if let Some(token) = self.try_cached(session, account).await {
                info!(target: "task_result", "{} | Using stored credentials", account);
                if let Some(m) = &self.metrics {
                    m.record_login(true);
                }
                return Ok(token);
            }
        }
        self.login(session, account, cancel).await
    }

    /// Drops the cached token and logs in again.
    pub async fn refresh<S: ApiSession>(
        &self,
        session: &mut S,
        account: &Account,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        debug!("Refreshing session for {}", account);
        self.cache.invalidate(&account.address).await;
        self.mark_stored_failed(account);
        self.login(session, account, cancel).await
    }

    async fn try_cached<S: ApiSession>(&self, session: &mut S, account: &Account) -> Option<String> {
        let creds = self.cache.get(&account.address)?;
        if !creds.is_reusable(Utc::now(), self.config.token_margin, &self.config.required_cookies) {
            debug!("Stored credentials for {} are stale or incomplete", account);
            return None;
        }
        let token = creds.token.clone()?;

        session.restore(&creds);
        match session.probe(account, &token).await {
            Ok(()) => Some(token),
            Err(ApiError::RateLimited { .. }) => {
                self.rotate_after_rate_limit(session);
                None
            }
            Err(e) => {
                debug!("Stored credentials rejected for {}: {}", account, e);
                self.cache.invalidate(&account.address).await;
                self.mark_stored_failed(account);
                None
            }
        }
    }

    async fn login<S: ApiSession>(
        &self,
        session: &mut S,
        account: &Account,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        let attempts = self.config.max_login_attempts.max(1);
        let backoff = RetryConfig::fixed(attempts, self.config.login_retry_delay);
        let mut last_error = String::new();

        info!("Starting login for {}", account);

        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(AuthError::Cancelled);
            }

            match session.login(account).await {
                Ok(mut creds) => {
                    let Some(token) = creds.token.clone() else {
                        return Err(AuthError::Rejected {
                            address: account.address.clone(),
                            reason: "login returned no token".to_string(),
                        });
                    };
                    if let Some(previous) = self.cache.get(&account.address) {
                        creds.last_daily_claim = creds.last_daily_claim.or(previous.last_daily_claim);
                    }
                    self.cache.put(&account.address, creds).await;
                    if let Some(m) = &self.metrics {
                        m.record_login(false);
                    }
                    info!(target: "task_result", "{} | Login SUCCESS", account);
                    return Ok(token);
                }
                Err(e) if !e.is_retryable() => {
                    warn!("Login rejected for {}: {}", account, e);
                    return Err(AuthError::Rejected {
                        address: account.address.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Login attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        attempts,
                        account,
                        e
                    );
                    if e.is_rate_limited() {
                        self.rotate_after_rate_limit(session);
                    }
                    last_error = e.to_string();

                    if attempt + 1 < attempts
                        && !sleep_or_cancel(backoff.calculate_delay(attempt), cancel).await
                    {
                        return Err(AuthError::Cancelled);
                    }
                }
            }
        }

        Err(AuthError::Exhausted {
            address: account.address.clone(),
            attempts,
            last: last_error,
        })
    }

    /// Cools down the session's proxy and moves the session to another one.
    pub fn rotate_after_rate_limit<S: ApiSession>(&self, session: &mut S) {
        if let Some(current) = session.proxy().cloned() {
            self.rotator.mark_rate_limited(&current);
        }
        let next = self.rotator.next();
        if next.is_none() {
            return;
        }
        if let Err(e) = session.switch_proxy(next) {
            warn!("Failed to switch proxy: {}", e);
        } else {
            debug!("Switched proxy after rate limit");
        }
    }

    fn stored_credentials_failed(&self, account: &Account) -> bool {
        self.stored_failed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&account.address.to_lowercase())
    }

    fn mark_stored_failed(&self, account: &Account) {
        self.stored_failed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(account.address.to_lowercase());
    }
}
