//! Durable account lists (exhausted, succeeded) written in keys-file format so
//! they can be fed back as input.

use crate::account::{parse_accounts, Account};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

pub struct AccountLedger {
    label: &'static str,
    path: PathBuf,
    recorded: Mutex<HashSet<String>>,
}

impl AccountLedger {
    /// Opens (or prepares) the ledger file and indexes addresses already in it.
    pub async fn open(label: &'static str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_accounts(&content)
                .into_iter()
                .map(|a| a.address.to_lowercase())
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        Ok(Self {
            label,
            path,
            recorded: Mutex::new(existing),
        })
    }

    /// Appends the account unless its address is already present.
    /// Returns whether a line was written.
    pub async fn record(&self, account: &Account) -> Result<bool> {
        let mut recorded = self.recorded.lock().await;
        if recorded.contains(&account.address.to_lowercase()) {
            return Ok(false);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(format!("{}\n", account.to_key_line()).as_bytes())
            .await
            .with_context(|| format!("Failed to append to {} ledger", self.label))?;
        file.flush().await?;

        recorded.insert(account.address.to_lowercase());
        info!("Wrote {} to {} ledger", account.address, self.label);
        Ok(true)
    }

    /// Accounts currently listed, deduplicated by address.
    pub async fn load(&self) -> Result<Vec<Account>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_accounts(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    /// Replaces the file content with `accounts`. The new list is written to a
    /// sibling file first and renamed over the old one.
    pub async fn rewrite(&self, accounts: &[Account]) -> Result<()> {
        let mut recorded = self.recorded.lock().await;

        let mut seen = HashSet::new();
        let mut content = String::new();
        for account in accounts {
            if seen.insert(account.address.to_lowercase()) {
                content.push_str(&account.to_key_line());
                content.push('\n');
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, content.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        *recorded = seen;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.rewrite(&[]).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PrivateKey;

    fn account(index: usize, addr: &str) -> Account {
        Account::new(index, addr, PrivateKey::new("0xabc123").unwrap())
    }

    #[tokio::test]
    async fn test_record_is_deduplicated_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/failure_accounts.txt");

        let ledger = AccountLedger::open("failure", &path).await.unwrap();
        assert!(ledger.record(&account(1, "0xAA")).await.unwrap());
        assert!(!ledger.record(&account(1, "0xaa")).await.unwrap());

        let reopened = AccountLedger::open("failure", &path).await.unwrap();
        assert!(!reopened.record(&account(1, "0xAA")).await.unwrap());
        assert!(reopened.record(&account(2, "0xBB")).await.unwrap());

        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.len(), 2);

        reopened.clear().await.unwrap();
        assert!(reopened.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_content_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failure_accounts.txt");

        let ledger = AccountLedger::open("failure", &path).await.unwrap();
        ledger.record(&account(1, "0xAA")).await.unwrap();
        ledger.record(&account(2, "0xBB")).await.unwrap();

        ledger
            .rewrite(&[account(2, "0xBB"), account(3, "0xCC"), account(3, "0xcc")])
            .await
            .unwrap();

        let loaded: Vec<String> = ledger
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.address)
            .collect();
        assert_eq!(loaded, vec!["0xBB", "0xCC"]);
        assert!(!dir.path().join("failure_accounts.tmp").exists());

        // 0xAA left the index with the rewrite, 0xCC joined it.
        assert!(ledger.record(&account(1, "0xAA")).await.unwrap());
        assert!(!ledger.record(&account(3, "0xCC")).await.unwrap());
    }
}
