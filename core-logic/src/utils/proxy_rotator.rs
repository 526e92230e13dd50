use crate::config::ProxyConfig;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared proxy pool with per-endpoint cooldowns after rate limiting.
#[derive(Debug)]
pub struct ProxyRotator {
    pool: Vec<ProxyConfig>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    base_cooldown: Duration,
    max_jitter: Duration,
}

impl ProxyRotator {
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(15);

    pub fn new(pool: Vec<ProxyConfig>) -> Self {
        Self::with_cooldown(pool, Self::DEFAULT_COOLDOWN, Self::DEFAULT_JITTER)
    }

    pub fn with_cooldown(pool: Vec<ProxyConfig>, base_cooldown: Duration, max_jitter: Duration) -> Self {
        Self {
            pool,
            cooldowns: Mutex::new(HashMap::new()),
            base_cooldown,
            max_jitter,
        }
    }

    /// Random endpoint among those not cooling down. When every endpoint is
    /// cooling down, the one that recovers first. `None` only for an empty pool.
    pub fn next(&self) -> Option<ProxyConfig> {
        if self.pool.is_empty() {
            return None;
        }

        let now = Instant::now();
        let cooldowns = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());

        let available: Vec<&ProxyConfig> = self
            .pool
            .iter()
            .filter(|p| cooldowns.get(&p.url).map_or(true, |until| *until <= now))
            .collect();

        if let Some(proxy) = available.choose(&mut rand::thread_rng()) {
            return Some((*proxy).clone());
        }

        self.pool
            .iter()
            .min_by_key(|p| cooldowns.get(&p.url).copied().unwrap_or(now))
            .cloned()
    }

    pub fn mark_rate_limited(&self, proxy: &ProxyConfig) {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        let until = Instant::now() + self.base_cooldown + jitter;

        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());
        cooldowns.insert(proxy.url.clone(), until);
        debug!(
            "Proxy {} cooling down for {:?}",
            proxy.endpoint(),
            self.base_cooldown + jitter
        );
    }

    pub fn clear(&self, proxy: &ProxyConfig) {
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());
        cooldowns.remove(&proxy.url);
    }

    pub fn cooldown_remaining(&self, proxy: &ProxyConfig) -> Option<Duration> {
        let cooldowns = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        cooldowns
            .get(&proxy.url)
            .filter(|until| **until > now)
            .map(|until| *until - now)
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Loads proxies, one per line: `ip:port`, `ip:port:user:pass` or a full URL.
    pub fn load_proxies(path: impl AsRef<Path>) -> Result<Vec<ProxyConfig>> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found. Running without proxies.", path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let proxies: Vec<ProxyConfig> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let parsed = parse_proxy_line(line);
                if parsed.is_none() {
                    warn!("Skipping invalid proxy line: {}", line);
                }
                parsed
            })
            .collect();

        info!("Loaded {} proxies from {}", proxies.len(), path.display());
        Ok(proxies)
    }
}

pub fn parse_proxy_line(line: &str) -> Option<ProxyConfig> {
    if let Some((scheme, rest)) = line.split_once("://") {
        let (auth, host) = match rest.rsplit_once('@') {
            Some((auth, host)) => (Some(auth), host),
            None => (None, rest),
        };
        if host.is_empty() {
            return None;
        }
        let (username, password) = match auth.and_then(|a| a.split_once(':')) {
            Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
            None => (None, None),
        };
        return Some(ProxyConfig {
            url: format!("{}://{}", scheme, host.trim_end_matches('/')),
            username,
            password,
        });
    }

    let parts: Vec<&str> = line.split(':').collect();
    match parts.as_slice() {
        [host, port] => Some(ProxyConfig {
            url: format!("http://{}:{}", host, port),
            username: None,
            password: None,
        }),
        [host, port, user, pass, ..] => Some(ProxyConfig {
            url: format!("http://{}:{}", host, port),
            username: Some(user.to_string()),
            password: Some(pass.to_string()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(n: u8) -> ProxyConfig {
        ProxyConfig {
            url: format!("http://10.0.0.{}:8080", n),
            username: None,
            password: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_cooling_proxy() {
        let rotator = ProxyRotator::new(vec![proxy(1), proxy(2)]);
        rotator.mark_rate_limited(&proxy(1));

        for _ in 0..20 {
            assert_eq!(rotator.next(), Some(proxy(2)));
        }

        rotator.clear(&proxy(1));
        assert!(rotator.cooldown_remaining(&proxy(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_cooling_returns_soonest_expiry() {
        let rotator = ProxyRotator::new(vec![proxy(1), proxy(2)]);
        rotator.mark_rate_limited(&proxy(1));
        rotator.mark_rate_limited(&proxy(2));

        let r1 = rotator.cooldown_remaining(&proxy(1)).unwrap();
        let r2 = rotator.cooldown_remaining(&proxy(2)).unwrap();
        let expected = if r1 <= r2 { proxy(1) } else { proxy(2) };

        assert_eq!(rotator.next(), Some(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let rotator = ProxyRotator::with_cooldown(
            vec![proxy(1)],
            Duration::from_secs(60),
            Duration::from_secs(15),
        );
        rotator.mark_rate_limited(&proxy(1));
        let remaining = rotator.cooldown_remaining(&proxy(1)).unwrap();
        assert!(remaining >= Duration::from_secs(60));
        assert!(remaining <= Duration::from_secs(75));

        tokio::time::advance(Duration::from_secs(76)).await;
        assert!(rotator.cooldown_remaining(&proxy(1)).is_none());
    }

    #[test]
    fn test_empty_pool_yields_none() {
        assert!(ProxyRotator::new(Vec::new()).next().is_none());
    }

    #[test]
    fn test_parse_proxy_formats() {
        let plain = parse_proxy_line("1.2.3.4:8000").unwrap();
        assert_eq!(plain.url, "http://1.2.3.4:8000");
        assert!(plain.username.is_none());

        let with_auth = parse_proxy_line("1.2.3.4:8000:user:pass").unwrap();
        assert_eq!(with_auth.username.as_deref(), Some("user"));
        assert_eq!(with_auth.password.as_deref(), Some("pass"));

        let url = parse_proxy_line("socks5://u:p@5.6.7.8:1080").unwrap();
        assert_eq!(url.url, "socks5://5.6.7.8:1080");
        assert_eq!(url.endpoint(), "5.6.7.8:1080");
        assert_eq!(url.password.as_deref(), Some("p"));

        assert!(parse_proxy_line("nonsense").is_none());
    }
}
