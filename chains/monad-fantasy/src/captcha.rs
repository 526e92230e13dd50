use crate::config::{CaptchaProvider, CaptchaSection};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use core_logic::utils::{sleep_or_cancel, with_retry, RetryConfig};
use core_logic::ChallengeSolver;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SITE_URL: &str = "https://monad.fantasy.top";
const SITE_KEY: &str = "0x4AAAAAAAM8ceq5KhP1uJBt";

const POLL_ATTEMPTS: u32 = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

fn submit_retry() -> RetryConfig {
    RetryConfig::exponential(3, Duration::from_secs(2))
}

pub fn build_solver(
    section: &CaptchaSection,
    cancel: CancellationToken,
) -> Result<Arc<dyn ChallengeSolver>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build captcha client")?;
    let api_key = section.api_key.trim().to_string();

    Ok(match section.provider {
        CaptchaProvider::Capmonster => Arc::new(CapMonsterSolver {
            client,
            api_key,
            cancel,
        }),
        CaptchaProvider::TwoCaptcha => Arc::new(TwoCaptchaSolver {
            client,
            api_key,
            cancel,
        }),
    })
}

pub struct CapMonsterSolver {
    client: Client,
    api_key: String,
    cancel: CancellationToken,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResponse {
    error_id: i64,
    task_id: Option<u64>,
    error_code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultResponse {
    error_id: i64,
    status: Option<String>,
    solution: Option<TurnstileSolution>,
    error_code: Option<String>,
}

#[derive(Deserialize)]
struct TurnstileSolution {
    token: String,
}

impl CapMonsterSolver {
    async fn create_task(&self) -> Result<u64> {
        let response: CreateTaskResponse = self
            .client
            .post("https://api.capmonster.cloud/createTask")
            .json(&json!({
                "clientKey": self.api_key,
                "task": {
                    "type": "TurnstileTaskProxyless",
                    "websiteURL": SITE_URL,
                    "websiteKey": SITE_KEY,
                }
            }))
            .send()
            .await?
            .json()
            .await?;

        if response.error_id != 0 {
            return Err(anyhow!(
                "createTask failed: {}",
                response.error_code.unwrap_or_default()
            ));
        }
        response.task_id.ok_or_else(|| anyhow!("createTask returned no taskId"))
    }

    async fn poll(&self, task_id: u64) -> Result<Option<String>> {
        for _ in 0..POLL_ATTEMPTS {
            if !sleep_or_cancel(POLL_INTERVAL, &self.cancel).await {
                return Ok(None);
            }
            let response: TaskResultResponse = self
                .client
                .post("https://api.capmonster.cloud/getTaskResult")
                .json(&json!({ "clientKey": self.api_key, "taskId": task_id }))
                .send()
                .await?
                .json()
                .await?;

            if response.error_id != 0 {
                return Err(anyhow!(
                    "getTaskResult failed: {}",
                    response.error_code.unwrap_or_default()
                ));
            }
            if response.status.as_deref() == Some("ready") {
                return Ok(response.solution.map(|s| s.token));
            }
        }
        warn!("Timeout waiting for CapMonster solution");
        Ok(None)
    }
}

#[async_trait]
impl ChallengeSolver for CapMonsterSolver {
    fn name(&self) -> &str {
        "capmonster"
    }

    async fn solve(&self) -> Option<String> {
        let created = with_retry(
            &submit_retry(),
            "capmonster createTask",
            &self.cancel,
            || self.create_task(),
            |_| true,
        )
        .await;
        let task_id = match created {
            Ok(id) => id,
            Err(e) => {
                warn!("CapMonster: {}", e);
                return None;
            }
        };
        debug!("CapMonster task {} created", task_id);
        self.poll(task_id).await.unwrap_or_else(|e| {
            warn!("CapMonster: {:#}", e);
            None
        })
    }
}

pub struct TwoCaptchaSolver {
    client: Client,
    api_key: String,
    cancel: CancellationToken,
}

/// `Some(Ok(token))` when solved, `Some(Err(..))` on a provider error,
/// `None` while the provider is still working.
fn parse_two_captcha(body: &str) -> Option<Result<String, String>> {
    let body = body.trim();
    if let Some(token) = body.strip_prefix("OK|") {
        return Some(Ok(token.to_string()));
    }
    if body == "CAPCHA_NOT_READY" {
        return None;
    }
    Some(Err(body.to_string()))
}

impl TwoCaptchaSolver {
    async fn submit(&self) -> Result<String> {
        let body = self
            .client
            .get("https://2captcha.com/in.php")
            .query(&[
                ("key", self.api_key.as_str()),
                ("method", "turnstile"),
                ("sitekey", SITE_KEY),
                ("pageurl", SITE_URL),
            ])
            .send()
            .await?
            .text()
            .await?;
        match parse_two_captcha(&body) {
            Some(Ok(id)) => Ok(id),
            Some(Err(e)) => Err(anyhow!("submit rejected: {}", e)),
            None => Err(anyhow!("unexpected submit reply")),
        }
    }

    async fn poll(&self, captcha_id: &str) -> Result<Option<String>> {
        for _ in 0..POLL_ATTEMPTS {
            if !sleep_or_cancel(POLL_INTERVAL, &self.cancel).await {
                return Ok(None);
            }
            let body = self
                .client
                .get("https://2captcha.com/res.php")
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", captcha_id),
                ])
                .send()
                .await?
                .text()
                .await?;
            match parse_two_captcha(&body) {
                Some(Ok(token)) => return Ok(Some(token)),
                Some(Err(e)) => return Err(anyhow!("error from 2captcha: {}", e)),
                None => continue,
            }
        }
        warn!("Timeout waiting for 2captcha solution");
        Ok(None)
    }
}

#[async_trait]
impl ChallengeSolver for TwoCaptchaSolver {
    fn name(&self) -> &str {
        "2captcha"
    }

    async fn solve(&self) -> Option<String> {
        let submitted = with_retry(
            &submit_retry(),
            "2captcha submit",
            &self.cancel,
            || self.submit(),
            |_| true,
        )
        .await;
        let captcha_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                warn!("2captcha: {}", e);
                return None;
            }
        };
        self.poll(&captcha_id).await.unwrap_or_else(|e| {
            warn!("2captcha: {:#}", e);
            None
        })
    }
}
