use super::info::fetch_basic_data;
use super::{expect_status, merge_result};
use crate::api::{GameApi, GAME_API};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, LedgerStore, TaskOutcome};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Converts fragments into as many packs of one kind as the balance buys.
pub struct PackPurchaseTask {
    pack_id: String,
    cost: u64,
    store: Arc<LedgerStore>,
}

impl PackPurchaseTask {
    pub fn new(pack_id: String, cost: u64, store: Arc<LedgerStore>) -> Self {
        Self {
            pack_id,
            cost,
            store,
        }
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for PackPurchaseTask {
    fn name(&self) -> &str {
        "packs"
    }

    fn required(&self) -> bool {
        false
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let fragments = match fetch_basic_data(session, account, token).await {
            Ok((player, _)) => player.fragments(),
            Err(outcome) => return outcome,
        };
        let affordable = fragments / self.cost;
        if affordable == 0 {
            info!(
                target: "task_result",
                "{} | Packs SKIPPED, {} fragments, pack costs {}",
                account,
                fragments,
                self.cost
            );
            return TaskOutcome::AlreadySatisfied;
        }

        let url = format!("{}/rewards/get-card-from-shards", GAME_API);
        let body = json!({ "fragments_cards_config_id": self.pack_id, "batch_amount": 1 });
        let mut bought = 0u64;
        let mut stopped = None;
        for _ in 0..affordable {
            match expect_status(session.post_json(&url, token, &body).await, &[200, 201]) {
                Ok(_) => bought += 1,
                Err(outcome) => {
                    stopped = Some(outcome);
                    break;
                }
            }
        }

        if bought > 0 {
            let remaining = fragments - bought * self.cost;
            info!(
                target: "task_result",
                "{} | Bought {} pack(s), {} fragments left",
                account,
                bought,
                remaining
            );
            // a failed write does not undo the purchases
            let _ = merge_result(
                &self.store,
                account,
                vec![
                    ("packs_bought".to_string(), bought.to_string()),
                    ("fragments".to_string(), remaining.to_string()),
                ],
            )
            .await;
        }

        stopped.unwrap_or(TaskOutcome::Success)
    }
}
