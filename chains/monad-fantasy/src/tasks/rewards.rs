use super::info::text;
use super::{expect_claim, expect_status, merge_result, ClaimReply, ClaimTally};
use crate::api::{GameApi, GAME_API};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, LedgerStore, TaskOutcome};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Used when no pending tournament reward names its tournament.
const DEFAULT_TOURNAMENT_NUMBER: u64 = 3;

/// Packs are bought with fragments, not claimed here.
const FRAGMENT_PACK: &str = "FRAGMENT_PACK";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerRewards {
    #[serde(default)]
    tournament_rewards: Vec<TournamentReward>,
    #[serde(default)]
    other_rewards: Vec<OtherReward>,
}

#[derive(Debug, Deserialize)]
struct TournamentReward {
    tournament_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OtherReward {
    #[serde(default)]
    id: Value,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    amount: Value,
}

#[derive(Debug, Deserialize)]
struct TournamentSummary {
    #[serde(default = "claimed_by_default")]
    already_claimed: bool,
    #[serde(default)]
    tournaments: Vec<Value>,
}

fn claimed_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TournamentClaim {
    claimed: Option<BTreeMap<String, Value>>,
}

/// Claims finished-tournament payouts and the other pending rewards.
pub struct RewardsClaimTask {
    store: Arc<LedgerStore>,
}

impl RewardsClaimTask {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Claims every unclaimed entry of the latest tournament with rewards.
    /// Returns what was granted, `None` when there was nothing to claim.
    async fn claim_tournament<S: GameApi>(
        session: &mut S,
        account: &Account,
        token: &str,
        rewards: &[TournamentReward],
    ) -> Result<Option<String>, TaskOutcome> {
        let number = rewards
            .iter()
            .filter_map(|r| r.tournament_number)
            .max()
            .unwrap_or(DEFAULT_TOURNAMENT_NUMBER);

        let url = format!(
            "{}/tournaments/summary/{}/player?playerId={}",
            GAME_API, number, account.address
        );
        let summary: TournamentSummary = expect_status(session.get(&url, token).await, &[200])?
            .json()
            .map_err(|e| TaskOutcome::Failed(e.to_string()))?;
        let ids: Vec<String> = summary
            .tournaments
            .iter()
            .map(|t| text(&t["id"], ""))
            .filter(|id| !id.is_empty())
            .collect();
        if summary.already_claimed || ids.is_empty() {
            debug!("{} | Tournament {} rewards already claimed", account, number);
            return Ok(None);
        }

        let url = format!(
            "{}/rewards/tournament-rewards-claim/{}",
            GAME_API,
            ids.join(",")
        );
        let result = session.post_empty(&url, token).await;
        if matches!(&result, Ok(resp) if resp.status == 400) {
            debug!("{} | Tournament {} rewards already claimed", account, number);
            return Ok(None);
        }
        let claim: TournamentClaim = expect_status(result, &[200, 201])?
            .json()
            .map_err(|e| TaskOutcome::Failed(e.to_string()))?;
        let claimed = claim
            .claimed
            .ok_or_else(|| TaskOutcome::Failed("claim reply without rewards".to_string()))?;
        let granted: Vec<String> = claimed
            .iter()
            .map(|(kind, amount)| format!("{}({})", kind, text(amount, "0")))
            .collect();
        Ok(Some(granted.join(",")))
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for RewardsClaimTask {
    fn name(&self) -> &str {
        "rewards"
    }

    fn required(&self) -> bool {
        false
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let url = format!("{}/player/player-rewards", GAME_API);
        let rewards: PlayerRewards = match expect_status(session.get(&url, token).await, &[200])
            .map(|r| r.json())
        {
            Ok(Ok(rewards)) => rewards,
            Ok(Err(e)) => return TaskOutcome::Failed(e.to_string()),
            Err(outcome) => return outcome,
        };

        let mut tally = ClaimTally::default();
        let mut fields = Vec::new();

        if !rewards.tournament_rewards.is_empty() {
            match Self::claim_tournament(session, account, token, &rewards.tournament_rewards).await {
                Ok(Some(granted)) => {
                    info!(target: "task_result", "{} | Tournament rewards claimed: {}", account, granted);
                    tally.claimed();
                    fields.push(("tournament_rewards".to_string(), granted));
                }
                Ok(None) => {}
                Err(TaskOutcome::Failed(reason)) => tally.failed("tournament", &reason),
                Err(outcome) => return outcome,
            }
        }

        let mut granted = Vec::new();
        for reward in &rewards.other_rewards {
            let kind = reward.kind.as_deref().unwrap_or("UNKNOWN");
            let id = text(&reward.id, "");
            if kind == FRAGMENT_PACK || id.is_empty() {
                continue;
            }
            let url = format!("{}/rewards/rewards-claim/{}", GAME_API, id);
            match expect_claim(session.post_empty(&url, token).await, &[200, 201]) {
                Ok(ClaimReply::Claimed) => {
                    tally.claimed();
                    granted.push(format!("{}({})", kind, text(&reward.amount, "0")));
                }
                Ok(ClaimReply::AlreadyClaimed) => {
                    debug!("{} | Reward {} already claimed", account, id);
                }
                Err(TaskOutcome::Failed(reason)) => tally.failed(&id, &reason),
                Err(outcome) => return outcome,
            }
        }
        if !granted.is_empty() {
            let granted = granted.join(",");
            info!(target: "task_result", "{} | Rewards claimed: {}", account, granted);
            fields.push(("claimed_rewards".to_string(), granted));
        }

        if !fields.is_empty() {
            let _ = merge_result(&self.store, account, fields).await;
        }
        tally.outcome()
    }
}
