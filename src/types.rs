//! Core data types shared by the detector, classifier, store and persistence
//!
//! Amounts are raw on-chain integers (`U256`). The issuer residual holding is
//! signed (`I256`) because it is reconstructed from observed transfers and can
//! legitimately dip below zero when the issuer moves tokens we never saw arrive.

use crate::errors::{EngineError, EngineResult};
use crate::risk::RiskAssessment;
use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Normalized account/contract address: `0x` followed by 40 lowercase hex chars
///
/// The only constructors normalize, so two `Address` values compare equal
/// exactly when they name the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::Config(format!("invalid address: {}", raw)));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// Build from the trailing 20 bytes of a 32-byte word
    pub fn from_word(word: &[u8]) -> Option<Self> {
        if word.len() != 32 || word[..12].iter().any(|b| *b != 0) {
            return None;
        }
        Some(Self(format!("0x{}", hex::encode(&word[12..]))))
    }

    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated `0x1234…abcd` form for log lines
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Raw log entry as delivered by the ledger facade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub contract: Address,
    /// Event signature followed by indexed arguments, each a 32-byte hex word
    pub topics: Vec<String>,
    /// Opaque hex-encoded data payload
    pub data: String,
    pub tx_id: String,
    pub block_number: u64,
    pub log_index: u64,
}

/// A decoded token transfer; the only shape downstream logic looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub tx_id: String,
    pub block_number: u64,
    pub log_index: u64,
}

impl TransferEvent {
    pub fn is_mint(&self) -> bool {
        self.from.is_zero()
    }
}

/// New-head notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl From<TradeDirection> for &'static str {
    fn from(direction: TradeDirection) -> Self {
        match direction {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub direction: TradeDirection,
    pub counterparty: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub tx_id: String,
    pub block_number: u64,
    pub timestamp: i64,
    pub is_issuer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransfer {
    pub from: Address,
    pub to: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub tx_id: String,
    pub block_number: u64,
    pub timestamp: i64,
    /// Running count of wallet transfers received by `to` on this token
    pub transfers_to_destination: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossPlatformTrade {
    pub seller: Address,
    pub exchange: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub tx_id: String,
    pub block_number: u64,
    pub timestamp: i64,
    #[serde(with = "u256_dec")]
    pub total_previously_bought: U256,
    pub previous_buy_count: u64,
    pub seconds_since_first_buy: i64,
}

/// Summary of one address's platform buys on a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyHistory {
    pub total_bought: U256,
    pub buy_count: u64,
    pub first_buy_timestamp: i64,
}

/// Live aggregate record for one discovered token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedToken {
    pub address: Address,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    #[serde(with = "u256_dec")]
    pub total_supply: U256,

    pub creator: Address,
    /// Name of the creator strategy that produced `creator`
    pub creator_source: String,
    pub creation_block: u64,
    pub creation_tx: String,
    pub created_at: i64,

    #[serde(with = "i256_dec")]
    pub issuer_residual_holding: I256,
    pub issuer_holding_defaulted: bool,

    pub buy_count: u64,
    pub sell_count: u64,
    pub unique_buyers: BTreeSet<Address>,
    pub unique_sellers: BTreeSet<Address>,
    #[serde(with = "u256_dec")]
    pub total_buy_volume: U256,
    #[serde(with = "u256_dec")]
    pub total_sell_volume: U256,

    pub trades: Vec<TradeRecord>,
    pub wallet_transfers: Vec<WalletTransfer>,
    pub cross_platform_trades: Vec<CrossPlatformTrade>,

    pub data_errors: Vec<String>,
    pub risk: RiskAssessment,
    pub last_updated: i64,
}

impl TrackedToken {
    pub fn is_creator(&self, address: &Address) -> bool {
        self.creator == *address
    }

    /// Platform buys made by `address`, if any
    pub fn buy_history(&self, address: &Address) -> Option<BuyHistory> {
        let mut history: Option<BuyHistory> = None;

        for trade in self
            .trades
            .iter()
            .filter(|t| t.direction == TradeDirection::Buy && t.counterparty == *address)
        {
            match history.as_mut() {
                Some(h) => {
                    h.total_bought = h.total_bought.saturating_add(trade.amount);
                    h.buy_count += 1;
                    h.first_buy_timestamp = h.first_buy_timestamp.min(trade.timestamp);
                }
                None => {
                    history = Some(BuyHistory {
                        total_bought: trade.amount,
                        buy_count: 1,
                        first_buy_timestamp: trade.timestamp,
                    });
                }
            }
        }

        history
    }

    pub fn wallet_transfers_to(&self, address: &Address) -> usize {
        self.wallet_transfers
            .iter()
            .filter(|t| t.to == *address)
            .count()
    }

    /// Holding after crediting `amount`, or `None` on overflow
    pub fn holding_plus(&self, amount: U256) -> Option<I256> {
        let delta = I256::try_from(amount).ok()?;
        self.issuer_residual_holding.checked_add(delta)
    }

    /// Holding after debiting `amount`, or `None` on overflow
    pub fn holding_minus(&self, amount: U256) -> Option<I256> {
        let delta = I256::try_from(amount).ok()?;
        self.issuer_residual_holding.checked_sub(delta)
    }
}

/// Serialize `U256` as a decimal string
pub mod u256_dec {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<U256>().map_err(D::Error::custom)
    }
}

/// Serialize `I256` as a decimal string
pub mod i256_dec {
    use alloy_primitives::I256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        I256::from_dec_str(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalizes_case() {
        let upper = Address::parse("0x00000000000000000000000000000000000CAFE0").unwrap();
        let lower = Address::parse("0x00000000000000000000000000000000000cafe0").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "0x00000000000000000000000000000000000cafe0");
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzz00000000000000000000000000000000000000").is_err());
        assert!(Address::parse("").is_err());
    }

    #[test]
    fn test_address_from_word() {
        let mut word = [0u8; 32];
        word[31] = 0xfe;
        word[30] = 0xca;
        let address = Address::from_word(&word).unwrap();
        assert_eq!(address.as_str(), "0x000000000000000000000000000000000000cafe");

        // Dirty high bytes are not an address
        word[0] = 1;
        assert!(Address::from_word(&word).is_none());
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::zero().is_zero());
        assert!(!Address::parse("0x0000000000000000000000000000000000000001")
            .unwrap()
            .is_zero());
    }

    #[test]
    fn test_short_form_keeps_head_and_tail() {
        let a = Address::parse("0x00000000000000000000000000000000000000aa").unwrap();
        let b = Address::parse("0x00000000000000000000000000000000000000bb").unwrap();
        assert_eq!(a.short(), "0x0000…00aa");
        assert_ne!(a.short(), b.short());
    }

    #[test]
    fn test_address_serde_round_trip() {
        let address = Address::parse("0xABCDEF0000000000000000000000000000000001").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0xabcdef0000000000000000000000000000000001\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
        assert!(serde_json::from_str::<Address>("\"0x12\"").is_err());
    }

    #[test]
    fn test_trade_record_amount_is_decimal_json() {
        let record = TradeRecord {
            direction: TradeDirection::Buy,
            counterparty: Address::zero(),
            amount: U256::from(1_000_500u64),
            tx_id: "0x01".to_string(),
            block_number: 10,
            timestamp: 1_700_000_000,
            is_issuer: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["amount"], "1000500");
        assert_eq!(json["direction"], "buy");
    }
}
