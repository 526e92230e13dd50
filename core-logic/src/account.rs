//! Account identities loaded from a `private_key:address` keys file.

use crate::error::WalletError;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Hex private key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, WalletError> {
        let raw = raw.into();
        let hex_part = raw.trim().trim_start_matches("0x");
        if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletError::InvalidKeyFormat);
        }
        Ok(Self(raw.trim().to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***REDACTED***")
    }
}

/// One wallet processed by the orchestrator. Identity is the address.
#[derive(Clone)]
pub struct Account {
    pub index: usize,
    pub address: String,
    key: PrivateKey,
}

impl Account {
    pub fn new(index: usize, address: impl Into<String>, key: PrivateKey) -> Self {
        Self {
            index,
            address: address.into(),
            key,
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.key
    }

    /// Line in keys-file format, used by the failure ledger.
    pub fn to_key_line(&self) -> String {
        format!("{}:{}", self.key.expose(), self.address)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("private_key", &"***REDACTED***")
            .finish()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.address)
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl Eq for Account {}

/// Parses keys-file content. Duplicate addresses keep their first key,
/// malformed lines are skipped with a warning.
pub fn parse_accounts(content: &str) -> Vec<Account> {
    let mut seen = HashSet::new();
    let mut accounts = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((raw_key, address)) = line.split_once(':') else {
            warn!("{}", WalletError::MalformedLine { line: line_no + 1 });
            continue;
        };
        let address = address.trim();
        if address.is_empty() || address.contains(':') {
            warn!("{}", WalletError::MalformedLine { line: line_no + 1 });
            continue;
        }

        let key = match PrivateKey::new(raw_key) {
            Ok(k) => k,
            Err(e) => {
                warn!("Skipping line {}: {}", line_no + 1, e);
                continue;
            }
        };

        if !seen.insert(address.to_lowercase()) {
            continue;
        }

        accounts.push(Account::new(accounts.len() + 1, address, key));
    }

    accounts
}

pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<Account>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read keys file {}", path.display()))?;

    let accounts = parse_accounts(&content);
    if accounts.is_empty() {
        return Err(WalletError::NoAccounts {
            path: path.display().to_string(),
        }
        .into());
    }

    info!("Loaded {} unique accounts from {}", accounts.len(), path.display());
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const KEY_B: &str = "8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";

    #[test]
    fn test_parse_dedups_by_address() {
        let content = format!(
            "{KEY_A}:0xAbC\n\n# comment\n{KEY_B}:0xabc\n{KEY_B}:0xdef\n"
        );
        let accounts = parse_accounts(&content);

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].address, "0xAbC");
        assert_eq!(accounts[0].private_key().expose(), KEY_A);
        assert_eq!(accounts[1].index, 2);
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let content = format!("garbage\nnothex:0x1\n{KEY_A}:\n{KEY_B}:0x2\n");
        let accounts = parse_accounts(&content);

        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].address, "0x2");
    }

    #[test]
    fn test_debug_redacts_key() {
        let account = Account::new(1, "0x1", PrivateKey::new(KEY_A).unwrap());
        let rendered = format!("{:?}", account);

        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("4c0883a6"));
        assert_eq!(account.to_key_line(), format!("{KEY_A}:0x1"));
    }

    #[test]
    fn test_load_accounts_empty_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(load_accounts(file.path()).is_err());
    }
}
