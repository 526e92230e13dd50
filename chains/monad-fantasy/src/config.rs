use anyhow::{Context, Result};
use config::{Config, Environment, File};
use core_logic::config::{AuthConfig, DispatchConfig, SequencerConfig};
use core_logic::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// Cookies a stored session must carry before it is even probed.
pub const REQUIRED_COOKIES: [&str; 4] = [
    "privy-token",
    "privy-session",
    "privy-access-token",
    "privy-refresh-token",
];

#[derive(Debug, Deserialize, Clone)]
pub struct FantasyConfig {
    pub app: AppSection,
    #[serde(default)]
    pub captcha: CaptchaSection,
    #[serde(default)]
    pub onboarding_quest: IdListTask,
    #[serde(default)]
    pub daily: Toggle,
    #[serde(default)]
    pub fragments: SingleIdTask,
    #[serde(default)]
    pub quest: IdListTask,
    #[serde(default)]
    pub info: Toggle,
    #[serde(default)]
    pub fragment_roulette: RouletteSection,
    #[serde(default)]
    pub rewards: Toggle,
    #[serde(default)]
    pub buy_packs: PackSection,
    #[serde(default)]
    pub tournaments: Vec<TournamentEntry>,
    #[serde(default)]
    pub tactic: TacticSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    #[serde(default = "default_keys_file")]
    pub keys_file: String,
    #[serde(default = "default_proxy_file")]
    pub proxy_file: String,
    #[serde(default = "default_failure_file")]
    pub failure_file: String,
    #[serde(default = "default_success_file")]
    pub success_file: String,
    /// Start a normal run with empty success/failure files and result records.
    #[serde(default = "default_clear_on_start")]
    pub clear_on_start: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    /// `[min, max]` seconds between first-wave submissions.
    pub acc_delays: Option<[u64; 2]>,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_privy_ca_id")]
    pub privy_ca_id: String,
    #[serde(default)]
    pub require_proxies: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaProvider {
    #[default]
    Capmonster,
    #[serde(rename = "2captcha")]
    TwoCaptcha,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CaptchaSection {
    #[serde(default)]
    pub provider: CaptchaProvider,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Toggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdListTask {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SingleIdTask {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouletteSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_fragments")]
    pub min_fragments: u64,
}

impl Default for RouletteSection {
    fn default() -> Self {
        Self {
            enabled: false,
            min_fragments: default_min_fragments(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PackSection {
    #[serde(default)]
    pub enabled: bool,
    /// One of the ids in [`PACK_COSTS`].
    #[serde(default)]
    pub pack_id: String,
}

/// Fragment price of each pack the shard shop sells.
pub const PACK_COSTS: [(&str, u64); 4] = [
    ("fa42e35e-611e-44de-90e7-819675d523e4", 100),
    ("786da1fa-1f9e-4dec-a898-a96fbed8d9c3", 150),
    ("ac23fd6b-962b-4ad7-aebd-e28a51bf8626", 650),
    ("28213951-712c-4316-a364-57037c618738", 3500),
];

pub fn pack_cost(pack_id: &str) -> Option<u64> {
    PACK_COSTS
        .iter()
        .find(|(id, _)| *id == pack_id)
        .map(|(_, cost)| *cost)
}

#[derive(Debug, Deserialize, Clone)]
pub struct TournamentEntry {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TacticSection {
    /// Star patterns, one per account group. Empty means plain budget fill.
    #[serde(default)]
    pub decks: Vec<Vec<u32>>,
    #[serde(default = "default_star_budget")]
    pub star_budget: u32,
    #[serde(default = "default_deck_size")]
    pub deck_size: usize,
}

impl Default for TacticSection {
    fn default() -> Self {
        Self {
            decks: Vec::new(),
            star_budget: default_star_budget(),
            deck_size: default_deck_size(),
        }
    }
}

fn default_keys_file() -> String {
    "data/keys.txt".to_string()
}
fn default_proxy_file() -> String {
    "data/proxy.txt".to_string()
}
fn default_failure_file() -> String {
    "logs/failure_accounts.txt".to_string()
}
fn default_success_file() -> String {
    "logs/success_accounts.txt".to_string()
}
fn default_clear_on_start() -> bool {
    true
}
fn default_db_path() -> String {
    "data/accounts.db".to_string()
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_threads() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_success_threshold() -> f64 {
    0.9
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_request_interval_ms() -> u64 {
    2000
}
fn default_privy_ca_id() -> String {
    "c4c1258c-8ddb-4e96-83cd-caacbe1cf8a4".to_string()
}
fn default_min_fragments() -> u64 {
    50
}
fn default_star_budget() -> u32 {
    24
}
fn default_deck_size() -> usize {
    5
}

impl FantasyConfig {
    /// Reads the TOML file, then `FANTASY__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("FANTASY").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        let mut config: FantasyConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!(e))?;
        config.normalize_tournaments();
        Ok(config)
    }

    /// Keeps only the first enabled tournament.
    pub fn normalize_tournaments(&mut self) {
        let mut kept = false;
        for entry in self.tournaments.iter_mut() {
            if !entry.enabled || entry.id.is_empty() {
                continue;
            }
            if kept {
                entry.enabled = false;
                info!("Disabled tournament: {}", entry.name);
            } else {
                kept = true;
                info!("Active tournament: {}", entry.name);
            }
        }
    }

    pub fn active_tournament(&self) -> Option<&TournamentEntry> {
        self.tournaments
            .iter()
            .find(|t| t.enabled && !t.id.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatch_config().validate()?;

        if self.app.request_interval_ms == 0 {
            return Err(invalid("app.request_interval_ms", "must be greater than 0"));
        }
        if self.captcha.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "captcha.api_key".to_string(),
            });
        }
        if self.onboarding_quest.enabled && self.onboarding_quest.ids.is_empty() {
            return Err(invalid("onboarding_quest.ids", "enabled without ids"));
        }
        if self.quest.enabled && self.quest.ids.is_empty() {
            return Err(invalid("quest.ids", "enabled without ids"));
        }
        if self.fragments.enabled && self.fragments.id.trim().is_empty() {
            return Err(invalid("fragments.id", "enabled without an id"));
        }
        if self.buy_packs.enabled && pack_cost(&self.buy_packs.pack_id).is_none() {
            return Err(invalid(
                "buy_packs.pack_id",
                &format!("unknown pack {:?}", self.buy_packs.pack_id),
            ));
        }
        if self
            .tournaments
            .iter()
            .filter(|t| t.enabled && !t.id.is_empty())
            .count()
            > 1
        {
            return Err(invalid("tournaments", "more than one tournament enabled"));
        }
        if self.tactic.deck_size == 0 {
            return Err(invalid("tactic.deck_size", "must be at least 1"));
        }
        if let Some(pattern) = self
            .tactic
            .decks
            .iter()
            .find(|d| d.iter().sum::<u32>() > self.tactic.star_budget)
        {
            return Err(invalid(
                "tactic.decks",
                &format!("pattern {:?} exceeds star budget {}", pattern, self.tactic.star_budget),
            ));
        }
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            threads: self.app.threads,
            max_attempts: self.app.max_attempts,
            success_threshold: self.app.success_threshold,
            acc_delays: self.app.acc_delays.map(|[min, max]| (min, max)),
            retry_delay: Duration::from_secs(self.app.retry_delay_secs),
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            required_cookies: REQUIRED_COOKIES.iter().map(|c| c.to_string()).collect(),
            ..AuthConfig::default()
        }
    }

    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig::default()
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.app.request_interval_ms)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
[app]
threads = 3
acc_delays = [1, 4]

[captcha]
provider = "2captcha"
api_key = "key"

[daily]
enabled = true

[quest]
enabled = true
ids = ["q1", "q2"]

[[tournaments]]
name = "bronze"
id = "t-bronze"
enabled = true

[[tournaments]]
name = "silver"
id = "t-silver"
enabled = true

[tactic]
decks = [[6, 5, 5, 4, 4]]
"#;

    pub(crate) fn sample() -> FantasyConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        FantasyConfig::load(path.to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_load_applies_defaults_and_keeps_first_tournament() {
        let config = sample();

        assert_eq!(config.app.threads, 3);
        assert_eq!(config.app.max_attempts, 3);
        assert_eq!(config.captcha.provider, CaptchaProvider::TwoCaptcha);
        assert_eq!(config.fragment_roulette.min_fragments, 50);
        assert_eq!(config.app.success_file, "logs/success_accounts.txt");
        assert!(config.app.clear_on_start);
        assert!(!config.rewards.enabled);
        assert!(!config.buy_packs.enabled);
        assert_eq!(config.active_tournament().map(|t| t.name.as_str()), Some("bronze"));
        assert!(!config.tournaments[1].enabled);
        assert_eq!(config.dispatch_config().acc_delays, Some((1, 4)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = sample();
        config.app.threads = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "threads"
        ));

        let mut config = sample();
        config.captcha.api_key.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingField {
                field: "captcha.api_key".to_string()
            })
        );

        let mut config = sample();
        config.quest.ids.clear();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.tactic.decks = vec![vec![9, 9, 9]];
        assert!(config.validate().is_err());

        let mut config = sample();
        config.buy_packs.enabled = true;
        config.buy_packs.pack_id = "not-a-pack".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "buy_packs.pack_id"
        ));
        config.buy_packs.pack_id = PACK_COSTS[1].0.to_string();
        assert!(config.validate().is_ok());
        assert_eq!(pack_cost(&config.buy_packs.pack_id), Some(150));
    }
}
