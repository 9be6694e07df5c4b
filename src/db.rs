//! Persistence adapter for tracked tokens
//!
//! Tables (see `/sql/`):
//! - `tracked_tokens` - UPSERT on address after every block that touched it

use crate::errors::{EngineError, EngineResult};
use crate::risk::{RiskAssessment, RiskLevel};
use crate::types::{Address, TrackedToken};
use alloy_primitives::{I256, U256};
use async_trait::async_trait;
use rusqlite::{Connection, Row};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or fully replace the row for `token.address`
    async fn upsert(&self, token: &TrackedToken) -> EngineResult<()>;

    /// Every stored token, for hydration at startup
    async fn fetch_all(&self) -> EngineResult<Vec<TrackedToken>>;
}

/// Run schema migrations from SQL files
///
/// Executes every `.sql` file in `schema_dir` in file-name order. Files must
/// be idempotent (`IF NOT EXISTS`).
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> EngineResult<()> {
    let schema_path = Path::new(schema_dir);
    if !schema_path.is_dir() {
        return Err(EngineError::Persistence(format!(
            "Schema directory not found: {}",
            schema_dir
        )));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)
        .map_err(|e| EngineError::Persistence(format!("{}: {}", schema_dir, e)))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);
    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();
        log::info!("   ├─ Executing: {}", filename);

        let sql = fs::read_to_string(&path)
            .map_err(|e| EngineError::Persistence(format!("{}: {}", filename, e)))?;
        conn.execute_batch(&sql)?;
    }
    log::info!("✅ Schema migrations complete");

    Ok(())
}

pub struct SqliteTokenStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTokenStore {
    /// Open (creating if needed) the database and apply migrations
    pub fn open(db_path: &str, schema_dir: &str) -> EngineResult<Self> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Persistence("connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn upsert(&self, token: &TrackedToken) -> EngineResult<()> {
        let unique_buyers = serde_json::to_string(&token.unique_buyers)?;
        let unique_sellers = serde_json::to_string(&token.unique_sellers)?;
        let trades = serde_json::to_string(&token.trades)?;
        let wallet_transfers = serde_json::to_string(&token.wallet_transfers)?;
        let cross_platform_trades = serde_json::to_string(&token.cross_platform_trades)?;
        let data_errors = serde_json::to_string(&token.data_errors)?;
        let risk_flags = serde_json::to_string(&token.risk.flags)?;

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO tracked_tokens (
                address, name, symbol, decimals, total_supply,
                creator, creator_source, creation_block, creation_tx, created_at,
                issuer_residual_holding, issuer_holding_defaulted,
                buy_count, sell_count, unique_buyers, unique_sellers,
                total_buy_volume, total_sell_volume,
                trades, wallet_transfers, cross_platform_trades, data_errors,
                risk_score, risk_level, risk_flags, last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                name = excluded.name,
                symbol = excluded.symbol,
                decimals = excluded.decimals,
                total_supply = excluded.total_supply,
                creator = excluded.creator,
                creator_source = excluded.creator_source,
                creation_block = excluded.creation_block,
                creation_tx = excluded.creation_tx,
                created_at = excluded.created_at,
                issuer_residual_holding = excluded.issuer_residual_holding,
                issuer_holding_defaulted = excluded.issuer_holding_defaulted,
                buy_count = excluded.buy_count,
                sell_count = excluded.sell_count,
                unique_buyers = excluded.unique_buyers,
                unique_sellers = excluded.unique_sellers,
                total_buy_volume = excluded.total_buy_volume,
                total_sell_volume = excluded.total_sell_volume,
                trades = excluded.trades,
                wallet_transfers = excluded.wallet_transfers,
                cross_platform_trades = excluded.cross_platform_trades,
                data_errors = excluded.data_errors,
                risk_score = excluded.risk_score,
                risk_level = excluded.risk_level,
                risk_flags = excluded.risk_flags,
                last_updated = excluded.last_updated
            "#,
            rusqlite::params![
                token.address.as_str(),
                token.name,
                token.symbol,
                token.decimals,
                token.total_supply.to_string(),
                token.creator.as_str(),
                token.creator_source,
                token.creation_block as i64,
                token.creation_tx,
                token.created_at,
                token.issuer_residual_holding.to_string(),
                token.issuer_holding_defaulted,
                token.buy_count as i64,
                token.sell_count as i64,
                unique_buyers,
                unique_sellers,
                token.total_buy_volume.to_string(),
                token.total_sell_volume.to_string(),
                trades,
                wallet_transfers,
                cross_platform_trades,
                data_errors,
                token.risk.risk_score,
                token.risk.risk_level.as_str(),
                risk_flags,
                token.last_updated,
            ],
        )?;

        Ok(())
    }

    async fn fetch_all(&self) -> EngineResult<Vec<TrackedToken>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT address, name, symbol, decimals, total_supply,
                   creator, creator_source, creation_block, creation_tx, created_at,
                   issuer_residual_holding, issuer_holding_defaulted,
                   buy_count, sell_count, unique_buyers, unique_sellers,
                   total_buy_volume, total_sell_volume,
                   trades, wallet_transfers, cross_platform_trades, data_errors,
                   risk_score, risk_level, risk_flags, last_updated
            FROM tracked_tokens
            ORDER BY created_at ASC, address ASC
            "#,
        )?;

        let rows = stmt
            .query_map([], StoredRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(StoredRow::into_token).collect()
    }
}

/// Raw column values; decoding of TEXT-encoded fields happens outside rusqlite
struct StoredRow {
    address: String,
    name: Option<String>,
    symbol: Option<String>,
    decimals: Option<u8>,
    total_supply: String,
    creator: String,
    creator_source: String,
    creation_block: i64,
    creation_tx: String,
    created_at: i64,
    issuer_residual_holding: String,
    issuer_holding_defaulted: bool,
    buy_count: i64,
    sell_count: i64,
    unique_buyers: String,
    unique_sellers: String,
    total_buy_volume: String,
    total_sell_volume: String,
    trades: String,
    wallet_transfers: String,
    cross_platform_trades: String,
    data_errors: String,
    risk_score: u32,
    risk_level: String,
    risk_flags: String,
    last_updated: i64,
}

fn parse_u256(column: &str, raw: &str) -> EngineResult<U256> {
    raw.parse::<U256>()
        .map_err(|e| EngineError::Persistence(format!("{} '{}': {}", column, raw, e)))
}

fn parse_count(column: &str, raw: i64) -> EngineResult<u64> {
    u64::try_from(raw)
        .map_err(|_| EngineError::Persistence(format!("{} is negative: {}", column, raw)))
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: row.get(0)?,
            name: row.get(1)?,
            symbol: row.get(2)?,
            decimals: row.get(3)?,
            total_supply: row.get(4)?,
            creator: row.get(5)?,
            creator_source: row.get(6)?,
            creation_block: row.get(7)?,
            creation_tx: row.get(8)?,
            created_at: row.get(9)?,
            issuer_residual_holding: row.get(10)?,
            issuer_holding_defaulted: row.get(11)?,
            buy_count: row.get(12)?,
            sell_count: row.get(13)?,
            unique_buyers: row.get(14)?,
            unique_sellers: row.get(15)?,
            total_buy_volume: row.get(16)?,
            total_sell_volume: row.get(17)?,
            trades: row.get(18)?,
            wallet_transfers: row.get(19)?,
            cross_platform_trades: row.get(20)?,
            data_errors: row.get(21)?,
            risk_score: row.get(22)?,
            risk_level: row.get(23)?,
            risk_flags: row.get(24)?,
            last_updated: row.get(25)?,
        })
    }

    fn into_token(self) -> EngineResult<TrackedToken> {
        let issuer_residual_holding =
            I256::from_dec_str(&self.issuer_residual_holding).map_err(|e| {
                EngineError::Persistence(format!(
                    "issuer_residual_holding '{}': {}",
                    self.issuer_residual_holding, e
                ))
            })?;
        let risk_level = RiskLevel::parse(&self.risk_level).ok_or_else(|| {
            EngineError::Persistence(format!("unknown risk level '{}'", self.risk_level))
        })?;

        Ok(TrackedToken {
            address: Address::parse(&self.address)
                .map_err(|e| EngineError::Persistence(e.to_string()))?,
            name: self.name,
            symbol: self.symbol,
            decimals: self.decimals,
            total_supply: parse_u256("total_supply", &self.total_supply)?,
            creator: Address::parse(&self.creator)
                .map_err(|e| EngineError::Persistence(e.to_string()))?,
            creator_source: self.creator_source,
            creation_block: parse_count("creation_block", self.creation_block)?,
            creation_tx: self.creation_tx,
            created_at: self.created_at,
            issuer_residual_holding,
            issuer_holding_defaulted: self.issuer_holding_defaulted,
            buy_count: parse_count("buy_count", self.buy_count)?,
            sell_count: parse_count("sell_count", self.sell_count)?,
            unique_buyers: serde_json::from_str(&self.unique_buyers)?,
            unique_sellers: serde_json::from_str(&self.unique_sellers)?,
            total_buy_volume: parse_u256("total_buy_volume", &self.total_buy_volume)?,
            total_sell_volume: parse_u256("total_sell_volume", &self.total_sell_volume)?,
            trades: serde_json::from_str(&self.trades)?,
            wallet_transfers: serde_json::from_str(&self.wallet_transfers)?,
            cross_platform_trades: serde_json::from_str(&self.cross_platform_trades)?,
            data_errors: serde_json::from_str(&self.data_errors)?,
            risk: RiskAssessment {
                flags: serde_json::from_str(&self.risk_flags)?,
                risk_score: self.risk_score,
                risk_level,
            },
            last_updated: self.last_updated,
        })
    }
}

/// In-process store for tests and dry runs
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<Address, TrackedToken>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: Vec<TrackedToken>) -> Self {
        let store = Self::default();
        if let Ok(mut map) = store.tokens.lock() {
            for token in tokens {
                map.insert(token.address.clone(), token);
            }
        }
        store
    }

    /// Make subsequent upserts fail with a persistence error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, address: &Address) -> Option<TrackedToken> {
        self.tokens.lock().ok()?.get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn upsert(&self, token: &TrackedToken) -> EngineResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::Persistence("write rejected".to_string()));
        }
        let mut tokens = self
            .tokens
            .lock()
            .map_err(|_| EngineError::Persistence("store lock poisoned".to_string()))?;
        tokens.insert(token.address.clone(), token.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_all(&self) -> EngineResult<Vec<TrackedToken>> {
        let tokens = self
            .tokens
            .lock()
            .map_err(|_| EngineError::Persistence("store lock poisoned".to_string()))?;
        Ok(tokens.values().cloned().collect())
    }
}
