//! Claim tasks, run per account in the order [`build_tasks`] returns them.

pub mod daily;
pub mod fragments;
pub mod info;
pub mod onboarding;
pub mod packs;
pub mod quests;
pub mod rewards;
pub mod roulette;
pub mod tournament;

use crate::api::{ApiResponse, GameApi};
use crate::config::{pack_cost, FantasyConfig};
use crate::deck::StarPatternPolicy;
use core_logic::error::ApiError;
use core_logic::{Account, ClaimTask, CredentialCache, LedgerStore, TaskOutcome};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Shared state the tasks read and write besides the session.
#[derive(Clone)]
pub struct TaskEnv {
    pub store: Arc<LedgerStore>,
    pub cache: Arc<CredentialCache>,
    pub memo: Arc<QuestMemo>,
    pub total_accounts: usize,
}

/// Quest ids already claimed per wallet during this run.
#[derive(Debug, Default)]
pub struct QuestMemo {
    done: Mutex<HashSet<(String, String)>>,
}

impl QuestMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self, wallet: &str, quest: &str) -> bool {
        self.lock().contains(&(wallet.to_lowercase(), quest.to_string()))
    }

    /// Returns `false` when the quest was already recorded.
    pub fn mark(&self, wallet: &str, quest: &str) -> bool {
        self.lock().insert((wallet.to_lowercase(), quest.to_string()))
    }

    pub fn completed(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String)>> {
        self.done.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Accepts the listed statuses, classifies everything else.
pub(crate) fn expect_status(
    result: Result<ApiResponse, ApiError>,
    ok: &[u16],
) -> Result<ApiResponse, TaskOutcome> {
    match result {
        Ok(resp) if ok.contains(&resp.status) => Ok(resp),
        Ok(resp) => Err(TaskOutcome::from_api_error(&resp.into_error())),
        Err(e) => Err(TaskOutcome::from_api_error(&e)),
    }
}

/// Reply to a claim call that made it past status classification.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ClaimReply {
    Claimed,
    /// The service says the reward was claimed before.
    AlreadyClaimed,
}

/// A rejection (4xx other than 401/429) whose body says "already".
pub(crate) fn is_already_claimed(resp: &ApiResponse) -> bool {
    (400..500).contains(&resp.status)
        && resp.status != 401
        && resp.status != 429
        && resp.body.to_lowercase().contains("already")
}

/// Like [`expect_status`], but an "already claimed" rejection is not a failure.
pub(crate) fn expect_claim(
    result: Result<ApiResponse, ApiError>,
    ok: &[u16],
) -> Result<ClaimReply, TaskOutcome> {
    match result {
        Ok(resp) if is_already_claimed(&resp) => Ok(ClaimReply::AlreadyClaimed),
        other => expect_status(other, ok).map(|_| ClaimReply::Claimed),
    }
}

/// Merges `fields` into the account's result record. A failed write is logged
/// and returned.
pub(crate) async fn merge_result(
    store: &LedgerStore,
    account: &Account,
    fields: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let result = store
        .update_result(&account.address, move |existing| {
            let mut record = existing.unwrap_or_default();
            record.extend(fields);
            record
        })
        .await;
    if let Err(e) = &result {
        warn!("Failed to update result record for {}: {:#}", account, e);
    }
    result.map(|_| ())
}

/// Tally of a task that claims several ids in one run.
#[derive(Debug, Default)]
pub(crate) struct ClaimTally {
    claimed: usize,
    failures: Vec<String>,
}

impl ClaimTally {
    pub(crate) fn claimed(&mut self) {
        self.claimed += 1;
    }

    pub(crate) fn failed(&mut self, id: &str, reason: &str) {
        self.failures.push(format!("{}: {}", id, reason));
    }

    pub(crate) fn outcome(self) -> TaskOutcome {
        if !self.failures.is_empty() {
            TaskOutcome::Failed(self.failures.join("; "))
        } else if self.claimed > 0 {
            TaskOutcome::Success
        } else {
            TaskOutcome::AlreadySatisfied
        }
    }
}

/// Enabled tasks in their fixed order.
pub fn build_tasks<S>(config: &FantasyConfig, env: &TaskEnv) -> Vec<Arc<dyn ClaimTask<S>>>
where
    S: GameApi + 'static,
{
    let mut tasks: Vec<Arc<dyn ClaimTask<S>>> = Vec::new();

    if config.onboarding_quest.enabled {
        tasks.push(Arc::new(onboarding::OnboardingTask::new(
            config.onboarding_quest.ids.clone(),
            env.memo.clone(),
        )));
    }
    if config.daily.enabled {
        tasks.push(Arc::new(daily::DailyClaimTask::new(
            env.cache.clone(),
            env.store.clone(),
        )));
    }
    if config.fragments.enabled {
        tasks.push(Arc::new(fragments::FragmentClaimTask::new(
            config.fragments.id.clone(),
            env.memo.clone(),
        )));
    }
    if config.quest.enabled {
        tasks.push(Arc::new(quests::QuestClaimTask::new(
            config.quest.ids.clone(),
            env.memo.clone(),
        )));
    }
    if config.info.enabled {
        tasks.push(Arc::new(info::InfoTask::new(env.store.clone())));
    }
    if config.rewards.enabled {
        tasks.push(Arc::new(rewards::RewardsClaimTask::new(env.store.clone())));
    }
    if config.fragment_roulette.enabled {
        tasks.push(Arc::new(roulette::RouletteTask::new(
            config.fragment_roulette.min_fragments,
            env.store.clone(),
        )));
    }
    if config.buy_packs.enabled {
        match pack_cost(&config.buy_packs.pack_id) {
            Some(cost) => tasks.push(Arc::new(packs::PackPurchaseTask::new(
                config.buy_packs.pack_id.clone(),
                cost,
                env.store.clone(),
            ))),
            None => warn!("Unknown pack id {}, pack buying disabled", config.buy_packs.pack_id),
        }
    }
    if let Some(tournament) = config.active_tournament() {
        tasks.push(Arc::new(tournament::TournamentTask::new(
            tournament.name.clone(),
            tournament.id.clone(),
            Arc::new(StarPatternPolicy::from_config(&config.tactic)),
            env.total_accounts,
            env.store.clone(),
        )));
    }

    tasks
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use core_logic::{Account, PrivateKey};
    use serde_json::Value;
    use std::collections::VecDeque;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Call {
        pub method: &'static str,
        pub url: String,
        pub body: Option<Value>,
    }

    /// Replays canned responses in order and records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedApi {
        pub replies: VecDeque<Result<ApiResponse, ApiError>>,
        pub calls: Vec<Call>,
        pub cancel: CancellationToken,
    }

    impl ScriptedApi {
        pub(crate) fn with(replies: Vec<(u16, &str)>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|(status, body)| {
                        Ok(ApiResponse {
                            status,
                            body: body.to_string(),
                            endpoint: "/scripted".to_string(),
                        })
                    })
                    .collect(),
                ..Default::default()
            }
        }

        fn next(&mut self, method: &'static str, url: &str, body: Option<Value>) -> Result<ApiResponse, ApiError> {
            self.calls.push(Call {
                method,
                url: url.to_string(),
                body,
            });
            self.replies.pop_front().unwrap_or_else(|| {
                Err(ApiError::Transient {
                    endpoint: url.to_string(),
                    reason: "no scripted reply".to_string(),
                })
            })
        }
    }

    #[async_trait]
    impl GameApi for ScriptedApi {
        async fn get(&mut self, url: &str, _token: &str) -> Result<ApiResponse, ApiError> {
            self.next("GET", url, None)
        }

        async fn post_json(&mut self, url: &str, _token: &str, body: &Value) -> Result<ApiResponse, ApiError> {
            self.next("POST", url, Some(body.clone()))
        }

        async fn post_empty(&mut self, url: &str, _token: &str) -> Result<ApiResponse, ApiError> {
            self.next("POST", url, None)
        }

        fn cancel_token(&self) -> &CancellationToken {
            &self.cancel
        }
    }

    pub(crate) fn account() -> Account {
        Account::new(
            1,
            "0xAbCd000000000000000000000000000000000001",
            PrivateKey::new("0x01").unwrap(),
        )
    }

    pub(crate) async fn store() -> (tempfile::TempDir, Arc<LedgerStore>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let store = LedgerStore::new(path.to_str().unwrap()).await.unwrap();
        (dir, Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_is_per_wallet() {
        let memo = QuestMemo::new();
        assert!(memo.mark("0xAA", "q1"));
        assert!(!memo.mark("0xaa", "q1"));
        assert!(memo.is_done("0xAA", "q1"));
        assert!(!memo.is_done("0xBB", "q1"));
        assert_eq!(memo.completed(), 1);
    }

    #[test]
    fn test_already_claimed_detection() {
        let reply = |status: u16, body: &str| ApiResponse {
            status,
            body: body.to_string(),
            endpoint: "/quest/claim".to_string(),
        };

        assert!(is_already_claimed(&reply(400, r#"{"message":"Quest Already claimed"}"#)));
        assert!(is_already_claimed(&reply(409, "already done")));
        assert!(!is_already_claimed(&reply(400, "not eligible")));
        assert!(!is_already_claimed(&reply(429, "already rate limited")));
        assert!(!is_already_claimed(&reply(500, "already")));

        assert_eq!(expect_claim(Ok(reply(200, "{}")), &[200]), Ok(ClaimReply::Claimed));
        assert_eq!(
            expect_claim(Ok(reply(400, "already claimed")), &[200]),
            Ok(ClaimReply::AlreadyClaimed)
        );
        assert!(matches!(
            expect_claim(Ok(reply(404, "missing")), &[200]),
            Err(TaskOutcome::Failed(_))
        ));
    }

    #[test]
    fn test_tally_outcome() {
        assert_eq!(ClaimTally::default().outcome(), TaskOutcome::AlreadySatisfied);

        let mut tally = ClaimTally::default();
        tally.claimed();
        assert_eq!(tally.outcome(), TaskOutcome::Success);

        let mut tally = ClaimTally::default();
        tally.claimed();
        tally.failed("q2", "HTTP 404");
        assert!(matches!(tally.outcome(), TaskOutcome::Failed(r) if r.contains("q2")));
    }

    #[tokio::test]
    async fn test_build_tasks_order() {
        let (_dir, store) = testing::store().await;
        let mut config = crate::config::tests::sample();
        config.onboarding_quest.enabled = true;
        config.onboarding_quest.ids = vec!["o1".to_string()];
        config.info.enabled = true;
        config.rewards.enabled = true;
        config.buy_packs.enabled = true;
        config.buy_packs.pack_id = crate::config::PACK_COSTS[0].0.to_string();

        let env = TaskEnv {
            store,
            cache: Arc::new(CredentialCache::new()),
            memo: Arc::new(QuestMemo::new()),
            total_accounts: 3,
        };
        let tasks = build_tasks::<testing::ScriptedApi>(&config, &env);
        let names: Vec<&str> = tasks.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["onboarding", "daily", "quests", "info", "rewards", "packs", "tournament"]);
    }
}
