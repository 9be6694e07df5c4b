//! Risk/anomaly scoring for tracked tokens
//!
//! Pure function of a token snapshot. Rules are additive:
//!
//! | Rule | Points |
//! |------|--------|
//! | issuer holding > `issuer_holding_pct` of supply | +2 |
//! | any single issuer sell > `issuer_sell_pct` of supply | +3 |
//! | sell/buy ratio > `sell_buy_ratio` with at least one sell | +2 |
//! | per address receiving > `wallet_transfer_limit` wallet transfers | +1 each |
//! | cross-platform exit within `fast_exit_secs` of the seller's first buy | +3 |
//!
//! Level: score >= `high_score` is HIGH, >= `medium_score` MEDIUM, > 0 LOW.

use crate::types::{Address, TradeDirection, TrackedToken};
use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ISSUER_HOLDING_POINTS: u32 = 2;
const LARGE_ISSUER_SELL_POINTS: u32 = 3;
const SELL_PRESSURE_POINTS: u32 = 2;
const WALLET_DISTRIBUTION_POINTS: u32 = 1;
const FAST_EXIT_POINTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub issuer_holding_pct: u64,
    pub issuer_sell_pct: u64,
    pub sell_buy_ratio: f64,
    pub wallet_transfer_limit: usize,
    pub fast_exit_secs: i64,
    pub high_score: u32,
    pub medium_score: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            issuer_holding_pct: 50,
            issuer_sell_pct: 10,
            sell_buy_ratio: 2.0,
            wallet_transfer_limit: 3,
            fast_exit_secs: 300,
            high_score: 7,
            medium_score: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFlag {
    IssuerHoldsMajority,
    LargeIssuerSell { tx_id: String },
    SellPressure { buys: u64, sells: u64 },
    WalletDistribution { address: Address, transfers: usize },
    FastExit { seller: Address, seconds: i64 },
}

impl RiskFlag {
    pub fn points(&self) -> u32 {
        match self {
            RiskFlag::IssuerHoldsMajority => ISSUER_HOLDING_POINTS,
            RiskFlag::LargeIssuerSell { .. } => LARGE_ISSUER_SELL_POINTS,
            RiskFlag::SellPressure { .. } => SELL_PRESSURE_POINTS,
            RiskFlag::WalletDistribution { .. } => WALLET_DISTRIBUTION_POINTS,
            RiskFlag::FastExit { .. } => FAST_EXIT_POINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(RiskLevel::None),
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub flags: Vec<RiskFlag>,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
}

/// `amount * 100 > supply * pct`, without division
fn exceeds_pct(amount: U256, supply: U256, pct: u64) -> bool {
    if supply.is_zero() {
        return false;
    }
    amount.saturating_mul(U256::from(100u64)) > supply.saturating_mul(U256::from(pct))
}

pub fn analyze(token: &TrackedToken, thresholds: &RiskThresholds) -> RiskAssessment {
    let mut flags = Vec::new();

    // Negative holdings are bookkeeping artifacts, never a majority
    if token.issuer_residual_holding > I256::ZERO
        && exceeds_pct(
            token.issuer_residual_holding.into_raw(),
            token.total_supply,
            thresholds.issuer_holding_pct,
        )
    {
        flags.push(RiskFlag::IssuerHoldsMajority);
    }

    if let Some(sell) = token.trades.iter().find(|t| {
        t.direction == TradeDirection::Sell
            && t.is_issuer
            && exceeds_pct(t.amount, token.total_supply, thresholds.issuer_sell_pct)
    }) {
        flags.push(RiskFlag::LargeIssuerSell {
            tx_id: sell.tx_id.clone(),
        });
    }

    if token.sell_count >= 1 {
        let ratio = token.sell_count as f64 / token.buy_count.max(1) as f64;
        if ratio > thresholds.sell_buy_ratio {
            flags.push(RiskFlag::SellPressure {
                buys: token.buy_count,
                sells: token.sell_count,
            });
        }
    }

    let mut received: BTreeMap<&Address, usize> = BTreeMap::new();
    for transfer in &token.wallet_transfers {
        *received.entry(&transfer.to).or_default() += 1;
    }
    for (address, transfers) in received {
        if transfers > thresholds.wallet_transfer_limit {
            flags.push(RiskFlag::WalletDistribution {
                address: address.clone(),
                transfers,
            });
        }
    }

    if let Some(exit) = token
        .cross_platform_trades
        .iter()
        .find(|t| t.seconds_since_first_buy <= thresholds.fast_exit_secs)
    {
        flags.push(RiskFlag::FastExit {
            seller: exit.seller.clone(),
            seconds: exit.seconds_since_first_buy,
        });
    }

    let risk_score: u32 = flags.iter().map(RiskFlag::points).sum();
    let risk_level = if risk_score >= thresholds.high_score {
        RiskLevel::High
    } else if risk_score >= thresholds.medium_score {
        RiskLevel::Medium
    } else if risk_score > 0 {
        RiskLevel::Low
    } else {
        RiskLevel::None
    };

    RiskAssessment {
        flags,
        risk_score,
        risk_level,
    }
}
