use super::{expect_claim, ClaimReply, ClaimTally, QuestMemo};
use crate::api::{GameApi, GAME_API};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, TaskOutcome};
use std::sync::Arc;
use tracing::info;

/// Completes onboarding quests. Optional: a failed claim is logged but does
/// not fail the account.
pub struct OnboardingTask {
    ids: Vec<String>,
    memo: Arc<QuestMemo>,
}

impl OnboardingTask {
    pub fn new(ids: Vec<String>, memo: Arc<QuestMemo>) -> Self {
        Self { ids, memo }
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for OnboardingTask {
    fn name(&self) -> &str {
        "onboarding"
    }

    fn required(&self) -> bool {
        false
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let mut tally = ClaimTally::default();

        for id in &self.ids {
            let key = format!("onboarding:{}", id);
            if self.memo.is_done(&account.address, &key) {
                continue;
            }

            let url = format!("{}/quest/onboarding/complete/{}", GAME_API, id);
            match expect_claim(session.post_empty(&url, token).await, &[201]) {
                Ok(ClaimReply::Claimed) => {
                    self.memo.mark(&account.address, &key);
                    tally.claimed();
                    info!(target: "task_result", "{} | Onboarding quest {} SUCCESS", account, id);
                }
                Ok(ClaimReply::AlreadyClaimed) => {
                    self.memo.mark(&account.address, &key);
                    info!(target: "task_result", "{} | Onboarding quest {} already done", account, id);
                }
                Err(TaskOutcome::Failed(reason)) => tally.failed(id, &reason),
                Err(other) => return other,
            }
        }

        tally.outcome()
    }
}
