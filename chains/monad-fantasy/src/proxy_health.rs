//! `check-proxies`: one HEAD request per proxy, run concurrently.

use core_logic::ProxyConfig;
use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};

pub const HEALTH_TARGET: &str = "https://monad.fantasy.top";
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProxyReport {
    pub proxy: ProxyConfig,
    /// Round trip of the probe, `None` when the proxy failed.
    pub latency: Option<Duration>,
}

impl ProxyReport {
    pub fn is_healthy(&self) -> bool {
        self.latency.is_some()
    }
}

async fn check_proxy(proxy: &ProxyConfig, target: &str) -> Option<Duration> {
    let mut reqwest_proxy = match reqwest::Proxy::all(&proxy.url) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Bad proxy config for {}: {}", proxy.endpoint(), e);
            return None;
        }
    };
    if let (Some(u), Some(p)) = (&proxy.username, &proxy.password) {
        reqwest_proxy = reqwest_proxy.basic_auth(u, p);
    }

    let client = match reqwest::Client::builder()
        .proxy(reqwest_proxy)
        .timeout(CHECK_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to build client for {}: {}", proxy.endpoint(), e);
            return None;
        }
    };

    let started = Instant::now();
    // Any response means the proxy forwards traffic.
    client.head(target).send().await.ok()?;
    Some(started.elapsed())
}

/// Probes every proxy, at most `concurrent_limit` at a time. Reports keep the
/// input order.
pub async fn scan_proxies(
    proxies: &[ProxyConfig],
    target: &str,
    concurrent_limit: usize,
) -> Vec<ProxyReport> {
    tracing::info!(
        "🔍 Scanning {} proxies ({} concurrent)...",
        proxies.len(),
        concurrent_limit
    );

    let mut results: Vec<(usize, Option<Duration>)> = stream::iter(proxies.iter().enumerate())
        .map(|(idx, proxy)| async move { (idx, check_proxy(proxy, target).await) })
        .buffer_unordered(concurrent_limit.max(1))
        .collect()
        .await;
    results.sort_by_key(|(idx, _)| *idx);

    results
        .into_iter()
        .map(|(idx, latency)| ProxyReport {
            proxy: proxies[idx].clone(),
            latency,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(url: &str) -> ProxyConfig {
        ProxyConfig {
            url: url.to_string(),
            username: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn test_dead_proxies_reported_in_order() {
        let proxies = vec![proxy("http://127.0.0.1:1"), proxy("not a url at all")];

        let reports = scan_proxies(&proxies, "http://127.0.0.1:2", 4).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].proxy.url, "http://127.0.0.1:1");
        assert!(reports.iter().all(|r| !r.is_healthy()));
    }
}
