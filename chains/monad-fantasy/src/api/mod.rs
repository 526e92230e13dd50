//! HTTP session against the fantasy.top and Privy endpoints.

pub mod headers;
pub mod siwe;

use async_trait::async_trait;
use chrono::Utc;
use core_logic::config::ProxyConfig;
use core_logic::error::{ApiError, WalletError};
use core_logic::{
    Account, ApiSession, ChallengeTokenPool, Credentials, MessageSigner, SessionFactory,
    WorkerContext,
};
use headers::BrowserIdentity;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const GAME_API: &str = "https://secret-api.fantasy.top";
pub const WEB_API: &str = "https://monad.fantasy.top";
const PRIVY_API: &str = "https://auth.privy.io/api/v1";
const PROBE_URL: &str = "https://fantasy.top/api/get-player-basic-data";

const PRIVY_APP_ID: &str = "cm6ezzy660297zgdk7t3glcz5";
const PRIVY_CLIENT: &str = "react-auth:1.92.3";
const PRIVY_CLIENT_ID: &str = "client-WY5gEtuoV4UpG2Le3n5pt6QQD61Ztx62VDwtDCZeQc3sN";

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Status and body of a completed call. Non-2xx statuses are left to the
/// caller, some endpoints use them as answers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub endpoint: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_error(self) -> ApiError {
        ApiError::from_status(self.status, &self.endpoint, &self.body)
    }

    /// Passes 2xx through, classifies everything else.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::InvalidResponse {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })
    }
}

fn build_client(proxy: Option<&ProxyConfig>, identity: &BrowserIdentity) -> Result<Client, ApiError> {
    let mut client_builder = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .default_headers(identity.headers());
    if let Some(proxy_conf) = proxy {
        let mut proxy = reqwest::Proxy::all(&proxy_conf.url).map_err(|e| ApiError::Transient {
            endpoint: proxy_conf.endpoint().to_string(),
            reason: format!("invalid proxy: {}", e),
        })?;
        if let (Some(u), Some(p)) = (&proxy_conf.username, &proxy_conf.password) {
            proxy = proxy.basic_auth(u, p);
        }
        client_builder = client_builder.proxy(proxy);
    }
    client_builder.build().map_err(|e| ApiError::Transient {
        endpoint: "client".to_string(),
        reason: e.to_string(),
    })
}

fn transport_error(endpoint: &str, e: reqwest::Error) -> ApiError {
    let reason = if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    };
    ApiError::Transient {
        endpoint: endpoint.to_string(),
        reason,
    }
}

/// Path part of a URL, used as the endpoint label in errors and logs.
fn endpoint_of(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let path = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
    path.split('?').next().unwrap_or(path).to_string()
}

/// Authenticated game calls used by the claim tasks.
#[async_trait]
pub trait GameApi: Send {
    async fn get(&mut self, url: &str, token: &str) -> Result<ApiResponse, ApiError>;

    async fn post_json(&mut self, url: &str, token: &str, body: &Value) -> Result<ApiResponse, ApiError>;

    /// POST with an empty body, as the claim endpoints expect.
    async fn post_empty(&mut self, url: &str, token: &str) -> Result<ApiResponse, ApiError>;

    fn cancel_token(&self) -> &CancellationToken;
}

pub struct HttpSession {
    worker: WorkerContext,
    client: Client,
    proxy: Option<ProxyConfig>,
    identity: BrowserIdentity,
    cookies: HashMap<String, String>,
    challenges: Arc<ChallengeTokenPool>,
    signer: Arc<dyn MessageSigner>,
    privy_ca_id: String,
}

impl HttpSession {
    /// Paces on this slot's limiter, attaches the cookie jar and captures
    /// any `Set-Cookie` of the response.
    async fn execute(&mut self, request: RequestBuilder, url: &str) -> Result<ApiResponse, ApiError> {
        let endpoint = endpoint_of(url);
        if !self.worker.pace().await {
            return Err(ApiError::Transient {
                endpoint,
                reason: "cancelled".to_string(),
            });
        }

        let request = match self.cookie_header() {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;
        let status = response.status().as_u16();
        for value in response.headers().get_all(SET_COOKIE) {
            if let Some((name, value)) = value
                .to_str()
                .ok()
                .and_then(|raw| raw.split(';').next())
                .and_then(|pair| pair.split_once('='))
            {
                self.cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        debug!("{} {} -> {}", self.worker.slot, endpoint, status);
        Ok(ApiResponse {
            status,
            body,
            endpoint,
        })
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        Some(pairs.join("; "))
    }

    fn privy_request(&self, url: &str) -> RequestBuilder {
        self.client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header("privy-app-id", PRIVY_APP_ID)
            .header("privy-client", PRIVY_CLIENT)
            .header("privy-client-id", PRIVY_CLIENT_ID)
            .header("privy-ca-id", &self.privy_ca_id)
            .header("sec-fetch-site", "cross-site")
    }
}

#[async_trait]
impl GameApi for HttpSession {
    async fn get(&mut self, url: &str, token: &str) -> Result<ApiResponse, ApiError> {
        let request = self.client.get(url).header(AUTHORIZATION, format!("Bearer {}", token));
        self.execute(request, url).await
    }

    async fn post_json(&mut self, url: &str, token: &str, body: &Value) -> Result<ApiResponse, ApiError> {
        let request = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .json(body);
        self.execute(request, url).await
    }

    async fn post_empty(&mut self, url: &str, token: &str) -> Result<ApiResponse, ApiError> {
        let request = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header("content-length", "0")
            .header("sec-fetch-site", "same-site");
        self.execute(request, url).await
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.worker.cancel
    }
}

#[async_trait]
impl ApiSession for HttpSession {
    fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    fn switch_proxy(&mut self, proxy: Option<ProxyConfig>) -> Result<(), ApiError> {
        self.client = build_client(proxy.as_ref(), &self.identity)?;
        self.proxy = proxy;
        Ok(())
    }

    fn restore(&mut self, credentials: &Credentials) {
        self.cookies = credentials.cookies.clone();
    }

    async fn probe(&mut self, account: &Account, token: &str) -> Result<(), ApiError> {
        let url = format!("{}?playerId={}", PROBE_URL, account.address);
        let response = self.get(&url, token).await?;
        if response.status == 200 {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }

    async fn login(&mut self, account: &Account) -> Result<Credentials, ApiError> {
        let address = self
            .signer
            .address_of(account.private_key())
            .map_err(|e| ApiError::Rejected {
                status_code: 0,
                endpoint: "signer".to_string(),
                body: e.to_string(),
            })?;
        if !address.eq_ignore_ascii_case(&account.address) {
            let mismatch = WalletError::AddressMismatch {
                expected: account.address.clone(),
                actual: address,
            };
            return Err(ApiError::Rejected {
                status_code: 0,
                endpoint: "signer".to_string(),
                body: mismatch.to_string(),
            });
        }

        let captcha = self
            .challenges
            .get_token()
            .await
            .ok_or_else(|| ApiError::Transient {
                endpoint: "captcha".to_string(),
                reason: "no challenge token".to_string(),
            })?;

        let init_url = format!("{}/siwe/init", PRIVY_API);
        let request = self.privy_request(&init_url).json(&siwe::InitRequest {
            address: &address,
            token: &captcha,
        });
        let init: siwe::InitResponse = self
            .execute(request, &init_url)
            .await?
            .error_for_status()?
            .json()?;

        let message = siwe::sign_in_message(&address, &init.nonce, Utc::now());
        let signature = self
            .signer
            .sign_message(&message, account.private_key())
            .map_err(|e| ApiError::Rejected {
                status_code: 0,
                endpoint: "signer".to_string(),
                body: e.to_string(),
            })?;

        let auth_url = format!("{}/siwe/authenticate", PRIVY_API);
        let request = self
            .privy_request(&auth_url)
            .json(&siwe::AuthenticateRequest::new(&message, &signature));
        let auth: siwe::AuthenticateResponse = self
            .execute(request, &auth_url)
            .await?
            .error_for_status()?
            .json()?;

        let identity_token = auth.identity_token.ok_or_else(|| ApiError::InvalidResponse {
            endpoint: "/api/v1/siwe/authenticate".to_string(),
            reason: "missing identity_token".to_string(),
        })?;
        if let Some(token) = auth.token {
            self.cookies.insert("privy-token".to_string(), token);
        }
        self.cookies
            .insert("privy-id-token".to_string(), identity_token.clone());

        let exchange_url = format!("{}/auth", GAME_API);
        self.post_json(
            &exchange_url,
            &identity_token,
            &serde_json::json!({ "address": address }),
        )
        .await?
        .error_for_status()?;

        Ok(Credentials::new(identity_token, self.cookies.clone()))
    }
}

/// Builds one [`HttpSession`] per account attempt, paced on the worker's slot.
pub struct HttpSessionFactory {
    challenges: Arc<ChallengeTokenPool>,
    signer: Arc<dyn MessageSigner>,
    privy_ca_id: String,
}

impl HttpSessionFactory {
    pub fn new(
        challenges: Arc<ChallengeTokenPool>,
        signer: Arc<dyn MessageSigner>,
        privy_ca_id: String,
    ) -> Self {
        Self {
            challenges,
            signer,
            privy_ca_id,
        }
    }
}

impl SessionFactory for HttpSessionFactory {
    type Session = HttpSession;

    fn create(&self, worker: &WorkerContext, proxy: Option<ProxyConfig>) -> Result<HttpSession, ApiError> {
        let identity = BrowserIdentity::random();
        let client = build_client(proxy.as_ref(), &identity)?;
        Ok(HttpSession {
            worker: worker.clone(),
            client,
            proxy,
            identity,
            cookies: HashMap::new(),
            challenges: self.challenges.clone(),
            signer: self.signer.clone(),
            privy_ca_id: self.privy_ca_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_host_and_query() {
        assert_eq!(endpoint_of("https://secret-api.fantasy.top/quest/daily-claim"), "/quest/daily-claim");
        assert_eq!(
            endpoint_of("https://fantasy.top/api/get-player-basic-data?playerId=0x1"),
            "/api/get-player-basic-data"
        );
        assert_eq!(endpoint_of("https://monad.fantasy.top"), "/");
    }

    #[test]
    fn test_response_classification() {
        let ok = ApiResponse {
            status: 201,
            body: "{\"success\":true}".to_string(),
            endpoint: "/quest/claim".to_string(),
        };
        assert!(ok.clone().error_for_status().is_ok());
        let value: serde_json::Value = ok.json().unwrap();
        assert_eq!(value["success"], true);

        let limited = ApiResponse {
            status: 429,
            body: String::new(),
            endpoint: "/quest/claim".to_string(),
        };
        assert!(limited.error_for_status().unwrap_err().is_rate_limited());
    }
}
