use super::{expect_claim, ClaimReply, ClaimTally, QuestMemo};
use crate::api::{GameApi, WEB_API};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, TaskOutcome};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Claims reward thresholds of regular quests.
pub struct QuestClaimTask {
    ids: Vec<String>,
    memo: Arc<QuestMemo>,
}

impl QuestClaimTask {
    pub fn new(ids: Vec<String>, memo: Arc<QuestMemo>) -> Self {
        Self { ids, memo }
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for QuestClaimTask {
    fn name(&self) -> &str {
        "quests"
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let mut tally = ClaimTally::default();
        let url = format!("{}/quest/claim", WEB_API);

        for id in &self.ids {
            let key = format!("quest:{}", id);
            if self.memo.is_done(&account.address, &key) {
                continue;
            }

            let body = json!({ "playerId": account.address, "questThresholdId": id });
            match expect_claim(session.post_json(&url, token, &body).await, &[200, 201]) {
                Ok(ClaimReply::Claimed) => {
                    self.memo.mark(&account.address, &key);
                    tally.claimed();
                    info!(target: "task_result", "{} | Quest {} SUCCESS", account, id);
                }
                Ok(ClaimReply::AlreadyClaimed) => {
                    self.memo.mark(&account.address, &key);
                    info!(target: "task_result", "{} | Quest {} already claimed", account, id);
                }
                Err(TaskOutcome::Failed(reason)) => tally.failed(id, &reason),
                Err(other) => return other,
            }
        }

        tally.outcome()
    }
}
