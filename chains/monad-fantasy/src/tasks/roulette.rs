use super::expect_status;
use super::info::fetch_basic_data;
use crate::api::{GameApi, GAME_API};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, LedgerStore, TaskOutcome};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpinResponse {
    #[serde(default)]
    success: bool,
    selected_prize: Option<Prize>,
}

#[derive(Debug, Deserialize)]
struct Prize {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

/// Spends fragments on one roulette spin once the balance allows it.
pub struct RouletteTask {
    min_fragments: u64,
    store: Arc<LedgerStore>,
}

impl RouletteTask {
    pub fn new(min_fragments: u64, store: Arc<LedgerStore>) -> Self {
        Self {
            min_fragments,
            store,
        }
    }

    async fn record_pack(&self, account: &Account, kind: String, text: String) {
        let result = self
            .store
            .update_result(&account.address, move |existing| {
                let mut record = existing.unwrap_or_default();
                record.insert("packs".to_string(), format!("{}({})", kind, text));
                record
            })
            .await;
        if let Err(e) = result {
            warn!("Failed to store pack prize for {}: {:#}", account, e);
        }
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for RouletteTask {
    fn name(&self) -> &str {
        "roulette"
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let fragments = match fetch_basic_data(session, account, token).await {
            Ok((player, _)) => player.fragments(),
            Err(outcome) => return outcome,
        };
        if fragments < self.min_fragments {
            info!(
                target: "task_result",
                "{} | Roulette SKIPPED, {} fragments, need {}",
                account,
                fragments,
                self.min_fragments
            );
            return TaskOutcome::AlreadySatisfied;
        }

        let url = format!("{}/rewards/buy-fragment-roulette", GAME_API);
        let result = session.post_empty(&url, token).await;
        if matches!(&result, Ok(resp) if resp.status == 400) {
            info!(target: "task_result", "{} | Roulette SKIPPED, not enough fragments", account);
            return TaskOutcome::AlreadySatisfied;
        }
        let response = match expect_status(result, &[200, 201]) {
            Ok(resp) => resp,
            Err(outcome) => return outcome,
        };

        let spin: SpinResponse = match response.json() {
            Ok(s) => s,
            Err(e) => return TaskOutcome::Failed(e.to_string()),
        };
        let prize = match spin.selected_prize {
            Some(prize) if spin.success => prize,
            _ => return TaskOutcome::Failed("unexpected roulette response".to_string()),
        };

        let kind = prize.kind.unwrap_or_else(|| "Unknown".to_string());
        let text = prize.text.unwrap_or_else(|| "Unknown".to_string());
        info!(target: "task_result", "{} | Roulette PRIZE: {}({})", account, kind, text);

        if kind == "PACK" {
            self.record_pack(account, kind, text).await;
        }
        TaskOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing::{account, store, ScriptedApi};

    fn basic(fragments: u64) -> String {
        format!(r#"{{"players_by_pk":{{"fragments":{}}},"rewards":[]}}"#, fragments)
    }

    #[tokio::test]
    async fn test_below_threshold_skips_spin() {
        let (_dir, store) = store().await;
        let task = RouletteTask::new(50, store);
        let body = basic(10);
        let mut api = ScriptedApi::with(vec![(200, body.as_str())]);

        assert_eq!(
            task.run(&mut api, &account(), "t").await,
            TaskOutcome::AlreadySatisfied
        );
        assert_eq!(api.calls.len(), 1);
    }

    #[tokio::test]
    async fn test_pack_prize_is_recorded() {
        let (_dir, store) = store().await;
        let task = RouletteTask::new(50, store.clone());
        let body = basic(80);
        let spin = r#"{"success":true,"selectedPrize":{"type":"PACK","text":"1"}}"#;
        let mut api = ScriptedApi::with(vec![(200, body.as_str()), (201, spin)]);

        assert_eq!(task.run(&mut api, &account(), "t").await, TaskOutcome::Success);
        assert!(api.calls[1].url.ends_with("/rewards/buy-fragment-roulette"));
        let record = store.get_result(&account().address).await.unwrap().unwrap();
        assert_eq!(record["packs"], "PACK(1)");
    }

    #[tokio::test]
    async fn test_server_refusal_means_nothing_to_spend() {
        let (_dir, store) = store().await;
        let task = RouletteTask::new(50, store);
        let body = basic(60);
        let mut api = ScriptedApi::with(vec![(200, body.as_str()), (400, "not enough")]);

        assert_eq!(
            task.run(&mut api, &account(), "t").await,
            TaskOutcome::AlreadySatisfied
        );
    }
}
