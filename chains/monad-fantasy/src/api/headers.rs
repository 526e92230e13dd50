use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36 Edg/134.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
];

/// Browser fingerprint a session presents for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserIdentity {
    pub user_agent: String,
    pub sec_ch_ua: String,
    pub platform: String,
}

impl BrowserIdentity {
    pub fn from_user_agent(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            sec_ch_ua: sec_ch_ua(user_agent),
            platform: platform(user_agent).to_string(),
        }
    }

    pub fn random() -> Self {
        let ua = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        Self::from_user_agent(ua)
    }

    /// Headers sent with every request of the session.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, "accept", "application/json, text/plain, */*");
        insert(&mut headers, "origin", "https://monad.fantasy.top");
        insert(&mut headers, "referer", "https://monad.fantasy.top/");
        insert(&mut headers, "user-agent", &self.user_agent);
        insert(&mut headers, "sec-ch-ua", &self.sec_ch_ua);
        insert(&mut headers, "sec-ch-ua-mobile", "?0");
        insert(&mut headers, "sec-ch-ua-platform", &format!("\"{}\"", self.platform));
        insert(&mut headers, "sec-fetch-dest", "empty");
        insert(&mut headers, "sec-fetch-mode", "cors");
        insert(&mut headers, "priority", "u=1, i");
        headers
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn platform(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();
    if ua.contains("win") {
        "Windows"
    } else if ua.contains("mac") {
        "macOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Windows"
    }
}

fn chrome_version(user_agent: &str) -> &str {
    user_agent
        .split("Chrome/")
        .nth(1)
        .and_then(|rest| rest.split('.').next())
        .unwrap_or("134")
}

fn sec_ch_ua(user_agent: &str) -> String {
    let v = chrome_version(user_agent);
    format!(
        "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"{v}\", \"Google Chrome\";v=\"{v}\""
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_matches_user_agent() {
        let mac = BrowserIdentity::from_user_agent(USER_AGENTS[5]);
        assert_eq!(mac.platform, "macOS");
        assert!(mac.sec_ch_ua.contains("\"Chromium\";v=\"132\""));

        let linux = BrowserIdentity::from_user_agent(USER_AGENTS[6]);
        assert_eq!(linux.platform, "Linux");

        let headers = BrowserIdentity::from_user_agent(USER_AGENTS[0]).headers();
        assert_eq!(headers["sec-ch-ua-platform"], "\"Windows\"");
        assert_eq!(headers["origin"], "https://monad.fantasy.top");
    }
}
