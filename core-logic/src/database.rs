use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::credentials::Credentials;
use crate::error::{ConfigError, DatabaseError};

/// Flat per-wallet result record (`fragments`, `fantasy_points`, `packs`, ...).
pub type ResultRecord = BTreeMap<String, String>;

/// SQLite-backed store for the per-wallet result ledger and cached credentials.
///
/// Every write goes through `write_lock`, so read-modify-write updates keyed by
/// wallet address never interleave.
#[derive(Debug)]
pub struct LedgerStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl LedgerStore {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
    pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError {
                    path: parent.display().to_string(),
                    msg: e.to_string(),
                })?;
            }
        }
        if !Path::new(db_path).exists() {
            std::fs::File::create(db_path).map_err(|e| ConfigError::IoError {
                path: db_path.to_string(),
                msg: e.to_string(),
            })?;
            info!("Created new ledger database: {}", db_path);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_millis(Self::DEFAULT_TIMEOUT_MS))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode=WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous=NORMAL;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&format!("sqlite://{}", db_path))
            .await
            .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        info!("Ledger store ready at {} (WAL mode)", db_path);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|_| DatabaseError::PoolExhausted {
                max_size: Self::DEFAULT_MAX_CONNECTIONS,
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS account_results (
                wallet_address TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS credentials (
                wallet_address TEXT PRIMARY KEY,
                token TEXT,
                cookies TEXT NOT NULL DEFAULT '{}',
                last_daily_claim TEXT
            );",
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;

        debug!("Ledger schema initialized.");
        Ok(())
    }

    /// Replaces the record stored for `wallet`.
    pub async fn upsert_result(&self, wallet: &str, record: &ResultRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_result(wallet, record).await
    }

    /// Read-modify-write of one wallet's record under the writer lock.
    pub async fn update_result<F>(&self, wallet: &str, update: F) -> Result<ResultRecord>
    where
        F: FnOnce(Option<ResultRecord>) -> ResultRecord + Send,
    {
        let _guard = self.write_lock.lock().await;
        let current = self.get_result(wallet).await?;
        let next = update(current);
        self.write_result(wallet, &next).await?;
        Ok(next)
    }

    async fn write_result(&self, wallet: &str, record: &ResultRecord) -> Result<()> {
        let payload = serde_json::to_string(record).context("Failed to encode result record")?;
        sqlx::query(
            "INSERT INTO account_results (wallet_address, record, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(wallet_address) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
        )
        .bind(wallet.to_lowercase())
        .bind(payload)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;
        Ok(())
    }

    pub async fn get_result(&self, wallet: &str) -> Result<Option<ResultRecord>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record FROM account_results WHERE wallet_address = ?")
                .bind(wallet.to_lowercase())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;

        row.map(|(raw,)| decode_record(wallet, &raw)).transpose()
    }

    /// All records ordered by wallet address.
    pub async fn read_all(&self) -> Result<Vec<(String, ResultRecord)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT wallet_address, record FROM account_results ORDER BY wallet_address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;

        rows.into_iter()
            .map(|(wallet, raw)| decode_record(&wallet, &raw).map(|r| (wallet, r)))
            .collect()
    }

    /// Drops every result record. Stored credentials are kept.
    pub async fn clear_results(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let done = sqlx::query("DELETE FROM account_results")
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;
        debug!("Cleared {} result records", done.rows_affected());
        Ok(done.rows_affected())
    }

    pub async fn save_credentials(&self, wallet: &str, creds: &Credentials) -> Result<()> {
        let cookies = serde_json::to_string(&creds.cookies).context("Failed to encode cookies")?;
        let last_claim = creds.last_daily_claim.map(|t| t.to_rfc3339());

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO credentials (wallet_address, token, cookies, last_daily_claim) VALUES (?, ?, ?, ?)
             ON CONFLICT(wallet_address) DO UPDATE SET token = excluded.token,
                cookies = excluded.cookies, last_daily_claim = excluded.last_daily_claim",
        )
        .bind(wallet.to_lowercase())
        .bind(creds.token.as_deref())
        .bind(cookies)
        .bind(last_claim)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;
        Ok(())
    }

    pub async fn load_credentials(&self) -> Result<Vec<(String, Credentials)>> {
        let rows: Vec<(String, Option<String>, String, Option<String>)> = sqlx::query_as(
            "SELECT wallet_address, token, cookies, last_daily_claim FROM credentials",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;

        let mut out = Vec::with_capacity(rows.len());
        for (wallet, token, cookies, last_claim) in rows {
            let cookies: HashMap<String, String> =
                serde_json::from_str(&cookies).map_err(|e| DatabaseError::CorruptRecord {
                    key: wallet.clone(),
                    reason: e.to_string(),
                })?;
            let last_daily_claim = last_claim
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc));
            out.push((
                wallet,
                Credentials {
                    token,
                    cookies,
                    last_daily_claim,
                },
            ));
        }
        Ok(out)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Ledger store closed");
    }
}

fn decode_record(wallet: &str, raw: &str) -> Result<ResultRecord> {
    serde_json::from_str(raw).map_err(|e| {
        DatabaseError::CorruptRecord {
            key: wallet.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
