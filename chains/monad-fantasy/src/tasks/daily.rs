use super::expect_status;
use crate::api::{ApiResponse, GameApi, GAME_API};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use core_logic::error::ApiError;
use core_logic::utils::sleep_or_cancel;
use core_logic::{Account, ClaimTask, CredentialCache, LedgerStore, TaskOutcome};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CLAIM_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const SERVER_ERROR_RETRIES: u32 = 3;
const SERVER_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyClaimResponse {
    #[serde(default)]
    success: bool,
    daily_quest_streak: Option<serde_json::Value>,
    daily_quest_progress: Option<serde_json::Value>,
    selected_prize: Option<Prize>,
    next_due_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Prize {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

fn parse_due_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn display(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "N/A".to_string(),
    }
}

pub struct DailyClaimTask {
    cache: Arc<CredentialCache>,
    store: Arc<LedgerStore>,
}

impl DailyClaimTask {
    pub fn new(cache: Arc<CredentialCache>, store: Arc<LedgerStore>) -> Self {
        Self { cache, store }
    }

    /// POST, repeated on 5xx, with a GET fallback when the method is refused.
    async fn request<S: GameApi>(&self, session: &mut S, token: &str) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/quest/daily-claim", GAME_API);
        let mut attempt = 0;
        loop {
            let response = session.post_empty(&url, token).await?;
            match response.status {
                405 => return session.get(&url, token).await,
                500..=599 if attempt + 1 < SERVER_ERROR_RETRIES => {
                    attempt += 1;
                    debug!("Daily claim returned {}, retrying", response.status);
                    if !sleep_or_cancel(SERVER_ERROR_PAUSE, session.cancel_token()).await {
                        return Err(response.into_error());
                    }
                }
                _ => return Ok(response),
            }
        }
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for DailyClaimTask {
    fn name(&self) -> &str {
        "daily"
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let now = Utc::now();
        if let Some(creds) = self.cache.get(&account.address) {
            if creds.daily_claimed_within(now, CLAIM_WINDOW) {
                debug!("{} | Daily already claimed in the last 24h", account);
                return TaskOutcome::AlreadySatisfied;
            }
        }

        let response = match expect_status(self.request(session, token).await, &[201]) {
            Ok(resp) => resp,
            Err(outcome) => return outcome,
        };
        let data: DailyClaimResponse = match response.json() {
            Ok(d) => d,
            Err(e) => return TaskOutcome::Failed(e.to_string()),
        };

        if !data.success {
            if let Some(due) = data.next_due_time.as_deref().and_then(parse_due_time) {
                let left = (due - now).max(ChronoDuration::zero());
                info!(
                    target: "task_result",
                    "{} | Daily SKIPPED, next claim in {}h {}m",
                    account,
                    left.num_hours(),
                    left.num_minutes() % 60
                );
                let claimed_at = due - ChronoDuration::hours(24);
                self.cache.record_daily_claim(&account.address, claimed_at).await;
            }
            return TaskOutcome::AlreadySatisfied;
        }

        let streak = display(&data.daily_quest_streak);
        let day = display(&data.daily_quest_progress);
        let (prize_type, prize_text) = data
            .selected_prize
            .map(|p| {
                (
                    p.kind.unwrap_or_else(|| "Unknown".to_string()),
                    p.text.unwrap_or_else(|| "Unknown".to_string()),
                )
            })
            .unwrap_or_else(|| ("Unknown".to_string(), "Unknown".to_string()));
        info!(
            target: "task_result",
            "{} | STREAK: {}, DAY: {}, PRIZE: {}({})",
            account,
            streak,
            day,
            prize_type,
            prize_text
        );

        self.cache.record_daily_claim(&account.address, now).await;
        let result = self
            .store
            .update_result(&account.address, move |record| {
                let mut record = record.unwrap_or_default();
                record.insert("daily_streak".to_string(), streak);
                record.insert("last_daily_claim".to_string(), now.to_rfc3339());
                record
            })
            .await;
        if let Err(e) = result {
            warn!("Failed to store daily claim for {}: {:#}", account, e);
        }

        TaskOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing::{account, store, ScriptedApi};

    #[tokio::test]
    async fn test_claim_records_timestamp() {
        let (_dir, store) = store().await;
        let cache = Arc::new(CredentialCache::new());
        let task = DailyClaimTask::new(cache.clone(), store.clone());
        let body = r#"{"success":true,"dailyQuestStreak":4,"dailyQuestProgress":2,"selectedPrize":{"type":"FRAGMENT","text":"10"}}"#;
        let mut api = ScriptedApi::with(vec![(201, body)]);

        assert_eq!(task.run(&mut api, &account(), "t").await, TaskOutcome::Success);
        assert!(cache
            .get(&account().address)
            .unwrap()
            .daily_claimed_within(Utc::now(), CLAIM_WINDOW));
        let record = store.get_result(&account().address).await.unwrap().unwrap();
        assert_eq!(record["daily_streak"], "4");

        // second run is skipped locally, no request
        let mut api = ScriptedApi::with(vec![]);
        assert_eq!(
            task.run(&mut api, &account(), "t").await,
            TaskOutcome::AlreadySatisfied
        );
        assert!(api.calls.is_empty());
    }

    #[tokio::test]
    async fn test_server_errors_retried_then_method_fallback() {
        let (_dir, store) = store().await;
        let task = DailyClaimTask::new(Arc::new(CredentialCache::new()), store);
        let mut api = ScriptedApi::with(vec![
            (500, ""),
            (405, ""),
            (201, r#"{"success":false,"nextDueTime":"2099-01-01T00:00:00.000Z"}"#),
        ]);

        assert_eq!(
            task.run(&mut api, &account(), "t").await,
            TaskOutcome::AlreadySatisfied
        );
        let methods: Vec<&str> = api.calls.iter().map(|c| c.method).collect();
        assert_eq!(methods, vec!["POST", "POST", "GET"]);
    }

    #[test]
    fn test_due_time_formats() {
        assert!(parse_due_time("2025-03-01T10:00:00.000Z").is_some());
        assert!(parse_due_time("2025-03-01T10:00:00.123").is_some());
        assert!(parse_due_time("tomorrow").is_none());
    }
}
