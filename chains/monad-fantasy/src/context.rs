//! Everything a run shares, built once at startup and passed down explicitly.

use crate::api::HttpSessionFactory;
use crate::captcha::build_solver;
use crate::config::FantasyConfig;
use crate::processor::FantasyProcessor;
use crate::signer::EthersSigner;
use crate::tasks::{build_tasks, QuestMemo, TaskEnv};
use anyhow::{bail, Context, Result};
use core_logic::{
    Account, AccountLedger, AccountState, ChallengeTokenPool, ConcurrentDispatcher,
    CredentialCache, LedgerStore, MessageSigner, MetricsCollector, ProxyRotator, RateLimiter,
    RetryCoordinator, SessionAuthenticator, TaskSequencer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AppContext {
    pub config: FantasyConfig,
    pub store: Arc<LedgerStore>,
    pub cache: Arc<CredentialCache>,
    pub rotator: Arc<ProxyRotator>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsCollector>,
    pub cancel: CancellationToken,
    pub challenges: Arc<ChallengeTokenPool>,
    pub failure_ledger: Arc<AccountLedger>,
    pub success_ledger: Arc<AccountLedger>,
    pub memo: Arc<QuestMemo>,
    signer: Arc<dyn MessageSigner>,
}

impl AppContext {
    /// Opens the ledger, hydrates the credential cache and loads proxies.
    /// Fails when proxies are required but none could be loaded.
    pub async fn build(config: FantasyConfig, cancel: CancellationToken) -> Result<Self> {
        let store = Arc::new(
            LedgerStore::new(&config.app.db_path)
                .await
                .with_context(|| format!("Failed to open ledger {}", config.app.db_path))?,
        );

        let cache = Arc::new(CredentialCache::with_store(store.clone()));
        match cache.hydrate().await {
            Ok(n) => info!("Loaded stored credentials for {} accounts", n),
            Err(e) => warn!("Could not load stored credentials: {:#}", e),
        }

        let proxies = ProxyRotator::load_proxies(&config.app.proxy_file)?;
        if proxies.is_empty() {
            if config.app.require_proxies {
                bail!("No proxies found in {}", config.app.proxy_file);
            }
            warn!("No proxies loaded, running on the direct connection");
        } else {
            info!("Loaded {} proxies for rotation.", proxies.len());
        }

        let solver = build_solver(&config.captcha, cancel.clone())?;
        let failure_ledger = Arc::new(AccountLedger::open("failure", &config.app.failure_file).await?);
        let success_ledger = Arc::new(AccountLedger::open("success", &config.app.success_file).await?);

        Ok(Self {
            store,
            cache,
            rotator: Arc::new(ProxyRotator::new(proxies)),
            limiter: Arc::new(RateLimiter::new(config.request_interval())),
            metrics: Arc::new(MetricsCollector::default()),
            cancel,
            challenges: Arc::new(ChallengeTokenPool::new(solver)),
            failure_ledger,
            success_ledger,
            memo: Arc::new(QuestMemo::new()),
            signer: Arc::new(EthersSigner),
            config,
        })
    }

    /// Empties the success and failure files and the result records before a
    /// full run, when `app.clear_on_start` is set. Credentials survive.
    pub async fn prepare_fresh_run(&self) -> Result<()> {
        if !self.config.app.clear_on_start {
            return Ok(());
        }
        self.success_ledger.clear().await?;
        self.failure_ledger.clear().await?;
        let cleared = self.store.clear_results().await?;
        info!("Cleared account files and {} stored results", cleared);
        Ok(())
    }

    /// After a retry run, keeps in the failure file only the `retried`
    /// accounts that did not succeed. Returns how many remain.
    pub async fn settle_retried(
        &self,
        retried: &[Account],
        coordinator: &RetryCoordinator,
    ) -> Result<usize> {
        let remaining: Vec<Account> = retried
            .iter()
            .filter(|a| coordinator.state(a) != Some(AccountState::Succeeded))
            .cloned()
            .collect();
        self.failure_ledger.rewrite(&remaining).await?;
        Ok(remaining.len())
    }

    pub fn authenticator(&self) -> Arc<SessionAuthenticator> {
        Arc::new(
            SessionAuthenticator::new(
                self.cache.clone(),
                self.rotator.clone(),
                self.config.auth_config(),
            )
            .with_metrics(self.metrics.clone()),
        )
    }

    /// Processor for a run over `total_accounts` accounts.
    pub fn processor(&self, total_accounts: usize) -> FantasyProcessor<HttpSessionFactory> {
        let env = TaskEnv {
            store: self.store.clone(),
            cache: self.cache.clone(),
            memo: self.memo.clone(),
            total_accounts,
        };
        let authenticator = self.authenticator();
        let sequencer = TaskSequencer::new(
            build_tasks(&self.config, &env),
            authenticator.clone(),
            self.config.sequencer_config(),
        )
        .with_metrics(self.metrics.clone());
        let factory = HttpSessionFactory::new(
            self.challenges.clone(),
            self.signer.clone(),
            self.config.app.privy_ca_id.clone(),
        );

        FantasyProcessor::new(factory, self.rotator.clone(), authenticator, sequencer)
    }

    pub fn dispatcher(&self) -> ConcurrentDispatcher {
        let dispatch = self.config.dispatch_config();
        let coordinator = Arc::new(
            RetryCoordinator::new(dispatch.max_attempts, dispatch.success_threshold)
                .with_failure_ledger(self.failure_ledger.clone())
                .with_success_ledger(self.success_ledger.clone()),
        );
        ConcurrentDispatcher::new(
            dispatch,
            coordinator,
            self.limiter.clone(),
            self.cancel.clone(),
        )
        .with_metrics(self.metrics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_wires_paths_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::tests::sample();
        config.app.db_path = dir.path().join("ledger.db").display().to_string();
        config.app.failure_file = dir.path().join("failed.txt").display().to_string();
        config.app.success_file = dir.path().join("success.txt").display().to_string();
        config.app.proxy_file = dir.path().join("proxy.txt").display().to_string();

        let ctx = AppContext::build(config.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.rotator.is_empty());
        assert!(ctx.cache.is_empty());
        assert_eq!(
            ctx.processor(3).task_names(),
            vec!["daily", "quests", "tournament"]
        );

        config.app.require_proxies = true;
        assert!(AppContext::build(config, CancellationToken::new()).await.is_err());
    }

    async fn context(dir: &tempfile::TempDir) -> AppContext {
        let mut config = crate::config::tests::sample();
        config.app.db_path = dir.path().join("ledger.db").display().to_string();
        config.app.failure_file = dir.path().join("failed.txt").display().to_string();
        config.app.success_file = dir.path().join("success.txt").display().to_string();
        config.app.proxy_file = dir.path().join("proxy.txt").display().to_string();
        AppContext::build(config, CancellationToken::new()).await.unwrap()
    }

    fn account(index: usize, address: &str) -> Account {
        Account::new(index, address, core_logic::PrivateKey::new("0x01").unwrap())
    }

    #[tokio::test]
    async fn test_fresh_run_clears_files_and_results() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir).await;
        ctx.failure_ledger.record(&account(1, "0xA")).await.unwrap();
        ctx.success_ledger.record(&account(2, "0xB")).await.unwrap();
        ctx.store
            .upsert_result("0xA", &[("packs".to_string(), "1".to_string())].into())
            .await
            .unwrap();

        ctx.prepare_fresh_run().await.unwrap();
        assert!(ctx.failure_ledger.load().await.unwrap().is_empty());
        assert!(ctx.success_ledger.load().await.unwrap().is_empty());
        assert!(ctx.store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_keeps_unfinished_accounts_in_failure_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir).await;
        let retried = vec![account(1, "0xA"), account(2, "0xB"), account(3, "0xC")];
        for a in &retried {
            ctx.failure_ledger.record(a).await.unwrap();
        }

        // 0xA succeeds, 0xB exhausts, 0xC never ran before the interruption
        let coordinator = RetryCoordinator::new(1, 1.0);
        coordinator.register(&retried);
        coordinator.begin_attempt(&retried[0]);
        coordinator
            .record_outcome(&retried[0], &core_logic::AttemptOutcome::Success)
            .await;
        coordinator.begin_attempt(&retried[1]);
        coordinator
            .record_outcome(&retried[1], &core_logic::AttemptOutcome::Failure("x".to_string()))
            .await;

        assert_eq!(ctx.settle_retried(&retried, &coordinator).await.unwrap(), 2);
        let left: Vec<String> = ctx
            .failure_ledger
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.address)
            .collect();
        assert_eq!(left, vec!["0xB", "0xC"]);
    }
}
