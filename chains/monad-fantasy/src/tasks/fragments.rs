use super::{expect_claim, ClaimReply, QuestMemo};
use crate::api::{GameApi, WEB_API};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, TaskOutcome};
use std::sync::Arc;
use tracing::info;

pub struct FragmentClaimTask {
    id: String,
    memo: Arc<QuestMemo>,
}

impl FragmentClaimTask {
    pub fn new(id: String, memo: Arc<QuestMemo>) -> Self {
        Self { id, memo }
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for FragmentClaimTask {
    fn name(&self) -> &str {
        "fragments"
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let key = format!("fragment:{}", self.id);
        if self.memo.is_done(&account.address, &key) {
            return TaskOutcome::AlreadySatisfied;
        }

        let url = format!("{}/quest/onboarding/complete/{}", WEB_API, self.id);
        match expect_claim(session.post_empty(&url, token).await, &[201]) {
            Ok(ClaimReply::Claimed) => {
                self.memo.mark(&account.address, &key);
                info!(target: "task_result", "{} | Fragment {} SUCCESS", account, self.id);
                TaskOutcome::Success
            }
            Ok(ClaimReply::AlreadyClaimed) => {
                self.memo.mark(&account.address, &key);
                TaskOutcome::AlreadySatisfied
            }
            Err(outcome) => outcome,
        }
    }
}
