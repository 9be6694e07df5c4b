//! Engine configuration from environment variables
//!
//! Loaded once at startup (after `.env`) with defaults for everything except
//! the RPC endpoint and the platform address.

use crate::detector::CreatorStrategy;
use crate::errors::{EngineError, EngineResult};
use crate::risk::RiskThresholds;
use crate::types::Address;
use std::collections::HashSet;
use std::env;

/// Parameters for the shared retry-with-backoff utility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total calls allowed, first attempt included
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Launch platform contract (primary issuance, buys and sells)
    pub platform: Address,

    /// Wrapped native asset the platform settles trades in
    pub settlement_asset: Option<Address>,

    /// Other platform contracts (routers, fee vaults, migrators)
    pub platform_infrastructure: HashSet<Address>,

    /// Recognized external exchange contracts
    pub exchange_addresses: Vec<Address>,

    /// Token contracts never considered for creation
    pub excluded_contracts: HashSet<Address>,

    pub creator_strategy: CreatorStrategy,

    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the `*.sql` schema files
    pub schema_dir: String,

    /// New-head poll period in milliseconds
    pub poll_interval_ms: u64,

    pub retry: RetryConfig,

    /// Max concurrent metadata/receipt lookups against the RPC layer
    pub enrichment_concurrency: usize,

    /// Flush budget at shutdown in milliseconds
    pub shutdown_grace_ms: u64,

    pub risk: RiskThresholds,
}

impl EngineConfig {
    /// Minimal configuration for one platform; everything else at defaults
    pub fn for_platform(rpc_url: &str, platform: Address) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            platform,
            settlement_asset: None,
            platform_infrastructure: HashSet::new(),
            exchange_addresses: Vec::new(),
            excluded_contracts: HashSet::new(),
            creator_strategy: CreatorStrategy::LastLogDestination,
            db_path: "launch_monitor.db".to_string(),
            schema_dir: "sql".to_string(),
            poll_interval_ms: 2_000,
            retry: RetryConfig::default(),
            enrichment_concurrency: 4,
            shutdown_grace_ms: 5_000,
            risk: RiskThresholds::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RPC_URL` (required)
    /// - `PLATFORM_ADDRESS` (required)
    /// - `SETTLEMENT_ASSET_ADDRESS` (optional)
    /// - `PLATFORM_INFRA_ADDRESSES`, `EXCHANGE_ADDRESSES`, `EXCLUDED_CONTRACTS`
    ///   (comma-separated, default empty)
    /// - `CREATOR_STRATEGY` (`last_log` | `signer`, default `last_log`)
    /// - `MONITOR_DB_PATH` (default: launch_monitor.db)
    /// - `MONITOR_SCHEMA_DIR` (default: sql)
    /// - `POLL_INTERVAL_MS` (default: 2000)
    /// - `RETRY_MAX_ATTEMPTS` / `RETRY_INITIAL_DELAY_MS` / `RETRY_MAX_DELAY_MS`
    ///   (default: 5 / 500 / 30000)
    /// - `ENRICHMENT_CONCURRENCY` (default: 4)
    /// - `SHUTDOWN_GRACE_MS` (default: 5000)
    /// - `RISK_ISSUER_HOLDING_PCT`, `RISK_ISSUER_SELL_PCT`, `RISK_SELL_BUY_RATIO`,
    ///   `RISK_WALLET_TRANSFER_LIMIT`, `RISK_FAST_EXIT_SECS`,
    ///   `RISK_HIGH_SCORE`, `RISK_MEDIUM_SCORE`
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = lookup("RPC_URL")
            .ok_or_else(|| EngineError::Config("RPC_URL must be set".to_string()))?;

        if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
            return Err(EngineError::Config(
                "RPC_URL must start with http:// or https://".to_string(),
            ));
        }

        let platform = lookup("PLATFORM_ADDRESS")
            .ok_or_else(|| EngineError::Config("PLATFORM_ADDRESS must be set".to_string()))
            .and_then(|raw| Address::parse(&raw))?;

        let settlement_asset = match lookup("SETTLEMENT_ASSET_ADDRESS") {
            Some(raw) if !raw.trim().is_empty() => Some(Address::parse(&raw)?),
            _ => None,
        };

        let creator_strategy = match lookup("CREATOR_STRATEGY") {
            Some(raw) => CreatorStrategy::parse(&raw).ok_or_else(|| {
                EngineError::Config(format!(
                    "CREATOR_STRATEGY must be 'last_log' or 'signer', got '{}'",
                    raw
                ))
            })?,
            None => CreatorStrategy::LastLogDestination,
        };

        let mut excluded_contracts: HashSet<Address> =
            parse_address_list(lookup("EXCLUDED_CONTRACTS"))?.into_iter().collect();
        // The settlement asset is never a launch
        if let Some(asset) = &settlement_asset {
            excluded_contracts.insert(asset.clone());
        }

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            initial_delay_ms: parse_or(
                &lookup,
                "RETRY_INITIAL_DELAY_MS",
                defaults.initial_delay_ms,
            ),
            max_delay_ms: parse_or(&lookup, "RETRY_MAX_DELAY_MS", defaults.max_delay_ms),
        };

        let risk_defaults = RiskThresholds::default();
        let risk = RiskThresholds {
            issuer_holding_pct: parse_or(
                &lookup,
                "RISK_ISSUER_HOLDING_PCT",
                risk_defaults.issuer_holding_pct,
            ),
            issuer_sell_pct: parse_or(
                &lookup,
                "RISK_ISSUER_SELL_PCT",
                risk_defaults.issuer_sell_pct,
            ),
            sell_buy_ratio: parse_or(&lookup, "RISK_SELL_BUY_RATIO", risk_defaults.sell_buy_ratio),
            wallet_transfer_limit: parse_or(
                &lookup,
                "RISK_WALLET_TRANSFER_LIMIT",
                risk_defaults.wallet_transfer_limit,
            ),
            fast_exit_secs: parse_or(&lookup, "RISK_FAST_EXIT_SECS", risk_defaults.fast_exit_secs),
            high_score: parse_or(&lookup, "RISK_HIGH_SCORE", risk_defaults.high_score),
            medium_score: parse_or(&lookup, "RISK_MEDIUM_SCORE", risk_defaults.medium_score),
        };

        Ok(Self {
            rpc_url,
            platform,
            settlement_asset,
            platform_infrastructure: parse_address_list(lookup("PLATFORM_INFRA_ADDRESSES"))?
                .into_iter()
                .collect(),
            exchange_addresses: parse_address_list(lookup("EXCHANGE_ADDRESSES"))?,
            excluded_contracts,
            creator_strategy,
            db_path: lookup("MONITOR_DB_PATH").unwrap_or_else(|| "launch_monitor.db".to_string()),
            schema_dir: lookup("MONITOR_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),
            poll_interval_ms: parse_or(&lookup, "POLL_INTERVAL_MS", 2_000),
            retry,
            enrichment_concurrency: parse_or(&lookup, "ENRICHMENT_CONCURRENCY", 4usize).max(1),
            shutdown_grace_ms: parse_or(&lookup, "SHUTDOWN_GRACE_MS", 5_000),
            risk,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', using default", key, raw);
                default
            }
        },
        None => default,
    }
}

fn parse_address_list(raw: Option<String>) -> EngineResult<Vec<Address>> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Address::parse)
            .collect()
    })
    .unwrap_or_else(|| Ok(Vec::new()))
}
