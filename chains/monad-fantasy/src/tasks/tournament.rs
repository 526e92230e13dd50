use super::{expect_status, merge_result};
use crate::api::{GameApi, WEB_API};
use crate::deck::{DeckPolicy, HeroCard};
use async_trait::async_trait;
use core_logic::{Account, ClaimTask, LedgerStore, TaskOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct Registration {
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choices {
    #[serde(default)]
    hero_choices: Vec<Value>,
}

/// Registers the account in the active tournament and saves a deck for it.
/// The entry id and the saved deck are kept in the result record, so a retry
/// resumes at the deck step instead of registering again.
pub struct TournamentTask {
    tournament: String,
    tactic_id: String,
    policy: Arc<dyn DeckPolicy>,
    total_accounts: usize,
    store: Arc<LedgerStore>,
}

impl TournamentTask {
    pub fn new(
        tournament: String,
        tactic_id: String,
        policy: Arc<dyn DeckPolicy>,
        total_accounts: usize,
        store: Arc<LedgerStore>,
    ) -> Self {
        Self {
            tournament,
            tactic_id,
            policy,
            total_accounts,
            store,
        }
    }

    fn entry_field(&self) -> String {
        format!("tactic_entry:{}", self.tactic_id)
    }

    fn deck_field(&self) -> String {
        format!("tactic_deck:{}", self.tactic_id)
    }

    /// `Ok(None)` when the service reports an existing registration this run
    /// never saw.
    async fn register<S: GameApi>(
        &self,
        session: &mut S,
        account: &Account,
        token: &str,
    ) -> Result<Option<String>, TaskOutcome> {
        let register_url = format!("{}/tactics/register", WEB_API);
        let result = session
            .post_json(&register_url, token, &json!({ "tactic_id": self.tactic_id }))
            .await;
        if matches!(&result, Ok(resp) if resp.status == 400) {
            info!(target: "task_result", "{} | Already registered in {}", account, self.tournament);
            return Ok(None);
        }
        let registration: Registration = expect_status(result, &[200, 201])?
            .json()
            .map_err(|e| TaskOutcome::Failed(e.to_string()))?;
        let entry_id = match registration.id {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(TaskOutcome::Failed("registration without entry id".to_string())),
        };
        info!(
            target: "task_result",
            "{} | Registered in {} with entry {}",
            account,
            self.tournament,
            entry_id
        );
        merge_result(&self.store, account, vec![(self.entry_field(), entry_id.clone())])
            .await
            .map_err(|e| TaskOutcome::Failed(format!("ledger write failed: {}", e)))?;
        Ok(Some(entry_id))
    }
}

#[async_trait]
impl<S: GameApi> ClaimTask<S> for TournamentTask {
    fn name(&self) -> &str {
        "tournament"
    }

    fn required(&self) -> bool {
        false
    }

    async fn run(&self, session: &mut S, account: &Account, token: &str) -> TaskOutcome {
        let record = match self.store.get_result(&account.address).await {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => return TaskOutcome::Failed(format!("ledger read failed: {}", e)),
        };
        if record.contains_key(&self.deck_field()) {
            info!(target: "task_result", "{} | Deck already saved in {}", account, self.tournament);
            return TaskOutcome::AlreadySatisfied;
        }

        let entry_id = match record.get(&self.entry_field()) {
            Some(id) => {
                debug!("{} | Resuming entry {} in {}", account, id, self.tournament);
                id.clone()
            }
            None => match self.register(session, account, token).await {
                Ok(Some(id)) => id,
                Ok(None) => return TaskOutcome::AlreadySatisfied,
                Err(outcome) => return outcome,
            },
        };

        let choices_url = format!("{}/tactics/entry/{}/choices", WEB_API, entry_id);
        let choices: Choices = match expect_status(session.get(&choices_url, token).await, &[200])
            .map(|r| r.json())
        {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => return TaskOutcome::Failed(e.to_string()),
            Err(outcome) => return outcome,
        };
        let cards: Vec<HeroCard> = choices
            .hero_choices
            .into_iter()
            .filter_map(HeroCard::from_value)
            .collect();
        debug!("{} | {} hero choices offered", account, cards.len());

        let Some(picked) = self.policy.select(&cards, account.index, self.total_accounts) else {
            return TaskOutcome::Failed("no valid deck".to_string());
        };
        let heroes: Vec<Value> = picked.iter().map(|&i| cards[i].raw.clone()).collect();
        let stars: u32 = picked.iter().map(|&i| cards[i].stars).sum();

        let save_url = format!("{}/tactics/save-deck", WEB_API);
        let body = json!({ "tacticPlayerId": entry_id, "heroChoices": heroes });
        match expect_status(session.post_json(&save_url, token, &body).await, &[200]) {
            Ok(_) => {
                info!(target: "task_result", "{} | Deck saved, {} stars", account, stars);
                let _ = merge_result(&self.store, account, vec![(self.deck_field(), stars.to_string())])
                    .await;
                TaskOutcome::Success
            }
            Err(outcome) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::StarPatternPolicy;
    use crate::tasks::testing::{account, store, ScriptedApi};

    fn task(patterns: Vec<Vec<u32>>, store: Arc<LedgerStore>) -> TournamentTask {
        TournamentTask::new(
            "bronze".into(),
            "t-1".into(),
            Arc::new(StarPatternPolicy::new(patterns, 24, 5)),
            1,
            store,
        )
    }

    fn hand(stars: &[u32]) -> String {
        let heroes: Vec<Value> = stars
            .iter()
            .enumerate()
            .map(|(i, s)| json!({ "id": i, "hero": { "stars": s } }))
            .collect();
        json!({ "hero_choices": heroes }).to_string()
    }

    #[tokio::test]
    async fn test_register_pick_and_save() {
        let (_dir, store) = store().await;
        let task = task(vec![vec![6, 5, 5, 4, 4]], store.clone());
        let choices = hand(&[1, 6, 5, 5, 4, 4, 7]);
        let mut api = ScriptedApi::with(vec![
            (201, r#"{"id":42}"#),
            (200, choices.as_str()),
            (200, "{}"),
        ]);

        assert_eq!(task.run(&mut api, &account(), "t").await, TaskOutcome::Success);
        assert_eq!(api.calls[0].body.as_ref().unwrap()["tactic_id"], "t-1");
        assert!(api.calls[1].url.ends_with("/tactics/entry/42/choices"));

        let saved = api.calls[2].body.as_ref().unwrap();
        assert_eq!(saved["tacticPlayerId"], "42");
        let total: u64 = saved["heroChoices"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["hero"]["stars"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 24);

        let record = store.get_result(&account().address).await.unwrap().unwrap();
        assert_eq!(record["tactic_entry:t-1"], "42");
        assert_eq!(record["tactic_deck:t-1"], "24");
    }

    #[tokio::test]
    async fn test_already_registered() {
        let (_dir, store) = store().await;
        let task = task(vec![], store);
        let mut api = ScriptedApi::with(vec![(400, "already")]);

        assert_eq!(
            task.run(&mut api, &account(), "t").await,
            TaskOutcome::AlreadySatisfied
        );
        assert_eq!(api.calls.len(), 1);
        assert!(!<TournamentTask as ClaimTask<ScriptedApi>>::required(&task));
    }

    #[tokio::test]
    async fn test_interrupted_entry_resumes_without_registering() {
        let (_dir, store) = store().await;
        let task = task(vec![vec![6, 5, 5, 4, 4]], store.clone());

        // registered, then rate limited before the choices arrived
        let mut first = ScriptedApi::with(vec![(201, r#"{"id":42}"#), (429, "")]);
        assert_eq!(
            task.run(&mut first, &account(), "t").await,
            TaskOutcome::RateLimited
        );

        let choices = hand(&[6, 5, 5, 4, 4]);
        let mut retry = ScriptedApi::with(vec![(200, choices.as_str()), (200, "{}")]);
        assert_eq!(task.run(&mut retry, &account(), "t").await, TaskOutcome::Success);
        assert_eq!(retry.calls.len(), 2);
        assert!(retry.calls[0].url.ends_with("/tactics/entry/42/choices"));
        assert_eq!(retry.calls[1].body.as_ref().unwrap()["tacticPlayerId"], "42");

        let mut again = ScriptedApi::with(vec![]);
        assert_eq!(
            task.run(&mut again, &account(), "t").await,
            TaskOutcome::AlreadySatisfied
        );
        assert!(again.calls.is_empty());
    }

    #[tokio::test]
    async fn test_no_valid_deck_skips_save() {
        let (_dir, store) = store().await;
        let task = task(vec![], store);
        let choices = hand(&[7, 7]);
        let mut api = ScriptedApi::with(vec![(201, r#"{"id":"e1"}"#), (200, choices.as_str())]);

        assert_eq!(
            task.run(&mut api, &account(), "t").await,
            TaskOutcome::Failed("no valid deck".to_string())
        );
        assert_eq!(api.calls.len(), 2);
    }
}
