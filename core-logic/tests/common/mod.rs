#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use core_logic::{Account, ApiError, ApiSession, Credentials, PrivateKey, ProxyConfig};
use std::collections::{HashMap, VecDeque};

pub fn account(index: usize, addr: &str) -> Account {
    Account::new(index, addr, PrivateKey::new(format!("0x{:064x}", index)).unwrap())
}

pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sid":"s","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

pub fn token_expiring_in(minutes: i64) -> String {
    jwt_with_exp((Utc::now() + ChronoDuration::minutes(minutes)).timestamp())
}

pub fn privy_cookies() -> HashMap<String, String> {
    ["privy-token", "privy-session"]
        .iter()
        .map(|n| (n.to_string(), "v".to_string()))
        .collect()
}

pub fn required_cookies() -> Vec<String> {
    vec!["privy-token".to_string(), "privy-session".to_string()]
}

/// In-memory session that records every call.
#[derive(Default)]
pub struct FakeSession {
    pub proxy: Option<ProxyConfig>,
    pub restored: Vec<Credentials>,
    pub probes: Vec<String>,
    pub probe_results: VecDeque<Result<(), ApiError>>,
    pub logins: u32,
    pub login_results: VecDeque<Result<Credentials, ApiError>>,
    pub proxy_switches: u32,
}

impl FakeSession {
    pub fn with_login_token(token: &str) -> Self {
        let mut session = Self::default();
        session
            .login_results
            .push_back(Ok(Credentials::new(token, privy_cookies())));
        session
    }
}

#[async_trait]
impl ApiSession for FakeSession {
    fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    fn switch_proxy(&mut self, proxy: Option<ProxyConfig>) -> Result<(), ApiError> {
        self.proxy = proxy;
        self.proxy_switches += 1;
        Ok(())
    }

    fn restore(&mut self, credentials: &Credentials) {
        self.restored.push(credentials.clone());
    }

    async fn probe(&mut self, _account: &Account, token: &str) -> Result<(), ApiError> {
        self.probes.push(token.to_string());
        self.probe_results.pop_front().unwrap_or(Ok(()))
    }

    async fn login(&mut self, _account: &Account) -> Result<Credentials, ApiError> {
        self.logins += 1;
        self.login_results
            .pop_front()
            .unwrap_or_else(|| Ok(Credentials::new(token_expiring_in(60), privy_cookies())))
    }
}
