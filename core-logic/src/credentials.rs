//! Per-wallet session artifacts and the cache that owns them.

use crate::database::LedgerStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: Option<String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    pub last_daily_claim: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(token: impl Into<String>, cookies: HashMap<String, String>) -> Self {
        Self {
            token: Some(token.into()),
            cookies,
            last_daily_claim: None,
        }
    }

    /// Token still valid after `margin` and every required cookie present.
    pub fn is_reusable(&self, now: DateTime<Utc>, margin: Duration, required: &[String]) -> bool {
        let Some(token) = self.token.as_deref() else {
            return false;
        };
        let Some(expiry) = token_expiry(token) else {
            return false;
        };
        let margin = ChronoDuration::from_std(margin).unwrap_or_else(|_| ChronoDuration::zero());
        if now >= expiry - margin {
            return false;
        }
        required.iter().all(|name| self.cookies.contains_key(name))
    }

    pub fn daily_claimed_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::zero());
        self.last_daily_claim
            .map(|at| now < at + window)
            .unwrap_or(false)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.cookies.keys().collect();
        names.sort();
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "***REDACTED***"))
            .field("cookies", &names)
            .field("last_daily_claim", &self.last_daily_claim)
            .finish()
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Reads the `exp` claim of a JWT without verifying its signature.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}

/// In-memory credential map, optionally written through to the ledger store.
#[derive(Default)]
pub struct CredentialCache {
    entries: RwLock<HashMap<String, Credentials>>,
    store: Option<Arc<LedgerStore>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<LedgerStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Loads every persisted entry into memory.
    pub async fn hydrate(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let rows = store.load_credentials().await?;
        let count = rows.len();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        for (wallet, creds) in rows {
            entries.insert(key(&wallet), creds);
        }
        Ok(count)
    }

    pub fn get(&self, wallet: &str) -> Option<Credentials> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(&key(wallet)).cloned()
    }

    pub async fn put(&self, wallet: &str, creds: Credentials) {
        {
            let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
            entries.insert(key(wallet), creds.clone());
        }
        self.persist(wallet, &creds).await;
    }

    /// Clears token and cookies; the daily-claim timestamp survives.
    pub async fn invalidate(&self, wallet: &str) {
        let cleared = {
            let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
            match entries.get_mut(&key(wallet)) {
                Some(creds) => {
                    creds.token = None;
                    creds.cookies.clear();
                    Some(creds.clone())
                }
                None => None,
            }
        };
        if let Some(creds) = cleared {
            debug!("Invalidated cached credentials for {}", wallet);
            self.persist(wallet, &creds).await;
        }
    }

    pub async fn record_daily_claim(&self, wallet: &str, at: DateTime<Utc>) {
        let updated = {
            let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
            let creds = entries.entry(key(wallet)).or_default();
            creds.last_daily_claim = Some(at);
            creds.clone()
        };
        self.persist(wallet, &updated).await;
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn persist(&self, wallet: &str, creds: &Credentials) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_credentials(wallet, creds).await {
                warn!("Failed to persist credentials for {}: {:#}", wallet, e);
            }
        }
    }
}

fn key(wallet: &str) -> String {
    wallet.to_lowercase()
}
