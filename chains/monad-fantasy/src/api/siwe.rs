//! Sign-In With Ethereum payloads for the Privy auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DOMAIN: &str = "monad.fantasy.top";
const STATEMENT: &str = "By signing, you are proving you own this wallet and logging in. This does not initiate a transaction or cost any fees.";

#[derive(Debug, Serialize)]
pub struct InitRequest<'a> {
    pub address: &'a str,
    pub token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct InitResponse {
    pub nonce: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest<'a> {
    pub chain_id: &'static str,
    pub connector_type: &'static str,
    pub message: &'a str,
    pub signature: &'a str,
    pub wallet_client_type: &'static str,
    pub mode: &'static str,
}

impl<'a> AuthenticateRequest<'a> {
    pub fn new(message: &'a str, signature: &'a str) -> Self {
        Self {
            chain_id: "eip155:1",
            connector_type: "injected",
            message,
            signature,
            wallet_client_type: "metamask",
            mode: "login-or-sign-up",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateResponse {
    pub token: Option<String>,
    pub identity_token: Option<String>,
}

/// Builds the EIP-4361 message signed during login.
pub fn sign_in_message(address: &str, nonce: &str, issued_at: DateTime<Utc>) -> String {
    [
        format!("{} wants you to sign in with your Ethereum account:", DOMAIN),
        address.to_string(),
        String::new(),
        STATEMENT.to_string(),
        String::new(),
        format!("URI: https://{}", DOMAIN),
        "Version: 1".to_string(),
        "Chain ID: 1".to_string(),
        format!("Nonce: {}", nonce),
        format!("Issued At: {}", issued_at.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
        "Resources:".to_string(),
        "- https://privy.io".to_string(),
    ]
    .join("\n")
}
