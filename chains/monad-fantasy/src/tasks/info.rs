use super::expect_status;
use crate::api::{GameApi, GAME_API};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, LedgerStore, ResultRecord, TaskOutcome};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// `players_by_pk` of the basic-data endpoint. Numbers arrive either as JSON
/// numbers or as strings depending on the field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerData {
    #[serde(default)]
    pub stars: Value,
    #[serde(default)]
    pub gold: Value,
    #[serde(default)]
    pub portfolio_value: Value,
    #[serde(default)]
    pub number_of_cards: Value,
    #[serde(default)]
    pub fantasy_points: Value,
    #[serde(default)]
    pub fragments: Value,
    #[serde(default)]
    pub is_onboarding_done: Value,
    #[serde(default)]
    pub whitelist_tickets: Value,
    #[serde(default)]
    pub total_gliding_score: Value,
}

impl PlayerData {
    pub fn fragments(&self) -> u64 {
        as_f64(&self.fragments) as u64
    }
}

#[derive(Debug, Deserialize)]
struct BasicDataResponse {
    players_by_pk: Option<PlayerData>,
    #[serde(default)]
    rewards: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingPacks {
    #[serde(default)]
    has_pending: bool,
    #[serde(default)]
    fragments: Value,
    #[serde(default)]
    claims: Vec<PendingClaim>,
}

#[derive(Debug, Deserialize)]
struct PendingClaim {
    #[serde(rename = "type")]
    kind: Option<String>,
    amount: Option<Value>,
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

pub(crate) fn text(value: &Value, default: &str) -> String {
    match value {
        Value::Null => default.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Basic player data plus the number of unclaimed rewards.
pub(crate) async fn fetch_basic_data<S: GameApi>(
    session: &mut S,
    account: &Account,
    token: &str,
) -> Result<(PlayerData, usize), TaskOutcome> {
    let url = format!("{}/player/basic-data/{}", GAME_API, account.address);
    let response = expect_status(session.get(&url, token).await, &[200])?;
    let data: BasicDataResponse = response
        .json()
        .map_err(|e| TaskOutcome::Failed(e.to_string()))?;
    let player = data
        .players_by_pk
        .ok_or_else(|| TaskOutcome::Failed("missing players_by_pk".to_string()))?;
    Ok((player, data.rewards.len()))
}

pub struct InfoTask {
    store: Arc<LedgerStore>,
}

impl InfoTask {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    async fn pending_packs<S: GameApi>(session: &mut S, token: &str) -> Option<String> {
        let url = format!("{}/rewards/has-pending-cards-from-fragments", GAME_API);
        let response = expect_status(session.get(&url, token).await, &[200]).ok()?;
        let pending: PendingPacks = response.json().ok()?;
        if !pending.has_pending {
            return None;
        }
        let claims: Vec<String> = pending
            .claims
            .iter()
            .filter_map(|c| {
                Some(format!(
                    "{}({})",
                    c.kind.as_deref()?,
                    text(c.amount.as_ref()?, "0")
                ))
            })
            .collect();
        Some(if claims.is_empty() {
            format!("UNKNOWN({})", text(&pending.fragments, "0"))
        } else {
            claims.join(",")
        })
    }
}

fn snapshot(player: &PlayerData, rewards: usize, pending: Option<String>) -> ResultRecord {
    let mut record = ResultRecord::new();
    record.insert("stars".to_string(), text(&player.stars, "0"));
    record.insert("gold".to_string(), text(&player.gold, "0"));
    record.insert("portfolio_value".to_string(), text(&player.portfolio_value, "0"));
    record.insert("number_of_cards".to_string(), text(&player.number_of_cards, "0"));
    record.insert("fantasy_points".to_string(), text(&player.fantasy_points, "0"));
    record.insert("fragments".to_string(), player.fragments().to_string());
    record.insert(
        "onboarding_done".to_string(),
        (as_f64(&player.is_onboarding_done) > 0.0).to_string(),
    );
    record.insert("whitelist_tickets".to_string(), text(&player.whitelist_tickets, "0"));
    record.insert(
        "gliding_score".to_string(),
        format!("{:.2}", as_f64(&player.total_gliding_score)),
    );
    record.insert("rewards".to_string(), rewards.to_string());
    if let Some(pending) = pending {
        record.insert("pending_packs".to_string(), pending);
    }
    record
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for InfoTask {
    fn name(&self) -> &str {
        "info"
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let (player, rewards) = match fetch_basic_data(session, account, token).await {
            Ok(data) => data,
            Err(outcome) => return outcome,
        };
        let pending = Self::pending_packs(session, token).await;
        let fresh = snapshot(&player, rewards, pending);

        info!(
            target: "task_result",
            "{} | fMON: {}, Cards: {}, Portfolio: {}, Fragments: {}, Onboarding: {}",
            account,
            fresh["fantasy_points"],
            fresh["number_of_cards"],
            fresh["portfolio_value"],
            fresh["fragments"],
            fresh["onboarding_done"]
        );

        // merge so fields owned by other tasks, like `packs`, survive
        let result = self
            .store
            .update_result(&account.address, move |existing| {
                let mut record = existing.unwrap_or_default();
                record.remove("pending_packs");
                record.extend(fresh);
                record
            })
            .await;
        match result {
            Ok(_) => TaskOutcome::Success,
            Err(e) => {
                warn!("Failed to store info for {}: {:#}", account, e);
                TaskOutcome::Failed(format!("ledger write failed: {}", e))
            }
        }
    }
}
