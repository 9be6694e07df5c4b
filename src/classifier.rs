//! Trade classification for tracked tokens
//!
//! Every decoded transfer of a tracked contract lands in exactly one bucket:
//! platform buy, platform sell, cross-platform exit, wallet transfer, or
//! skipped. Checks run before any mutation so a rejected transfer leaves the
//! token untouched.

use crate::decoder::DecodedTransaction;
use crate::errors::{EngineError, EngineResult};
use crate::state::TokenStateStore;
use crate::types::{
    Address, CrossPlatformTrade, TradeDirection, TradeRecord, TrackedToken, TransferEvent,
    WalletTransfer,
};
use alloy_primitives::{I256, U256};
use std::collections::{BTreeSet, HashSet};

/// Known external exchange contracts
pub trait ExchangeDirectory: Send + Sync {
    fn is_exchange(&self, address: &Address) -> bool;
}

/// Fixed allow-list loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticExchangeList {
    addresses: HashSet<Address>,
}

impl StaticExchangeList {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }
}

impl ExchangeDirectory for StaticExchangeList {
    fn is_exchange(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UntrackedContract,
    ZeroAmount,
    CreationTransaction,
    MintOrBurn,
    Infrastructure,
    NoBuyHistory,
    UnknownSource,
    SettlementLeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Buy,
    Sell,
    CrossPlatform,
    WalletTransfer,
    Skipped(SkipReason),
}

/// Per-transaction tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSummary {
    pub buys: usize,
    pub sells: usize,
    pub cross_platform: usize,
    pub wallet_transfers: usize,
    pub skipped: usize,
    pub rejected: usize,
    /// Tracked tokens mutated by this transaction
    pub touched: BTreeSet<Address>,
}

impl TransactionSummary {
    pub fn classified(&self) -> usize {
        self.buys + self.sells + self.cross_platform + self.wallet_transfers
    }
}

/// Mutation computed against a read-only snapshot, applied afterwards
enum Update {
    Trade {
        record: TradeRecord,
        volume: U256,
        holding: Option<I256>,
    },
    Exit {
        trade: CrossPlatformTrade,
        holding: Option<I256>,
    },
    Wallet {
        transfer: WalletTransfer,
        holding: Option<I256>,
    },
}

pub struct TradeClassifier {
    platform: Address,
    infrastructure: HashSet<Address>,
    settlement_asset: Option<Address>,
    exchanges: Box<dyn ExchangeDirectory>,
    distribution_threshold: usize,
}

impl TradeClassifier {
    pub fn new(
        platform: Address,
        infrastructure: HashSet<Address>,
        settlement_asset: Option<Address>,
        exchanges: Box<dyn ExchangeDirectory>,
        distribution_threshold: usize,
    ) -> Self {
        Self {
            platform,
            infrastructure,
            settlement_asset,
            exchanges,
            distribution_threshold,
        }
    }

    fn is_infrastructure(&self, address: &Address) -> bool {
        address.is_zero() || self.infrastructure.contains(address)
    }

    /// Classify every transfer of a transaction in log order
    ///
    /// A rejected transfer is logged and counted; the rest of the transaction
    /// is still applied.
    pub fn classify_transaction(
        &self,
        tx: &DecodedTransaction,
        store: &mut TokenStateStore,
        timestamp: i64,
    ) -> TransactionSummary {
        let settlement_leg = self
            .settlement_asset
            .as_ref()
            .map(|asset| tx.moves_asset(asset))
            .unwrap_or(false);

        let mut summary = TransactionSummary::default();
        for transfer in &tx.transfers {
            match self.classify_transfer(transfer, settlement_leg, store, timestamp) {
                Ok(Classification::Skipped(SkipReason::UntrackedContract)) => {}
                Ok(Classification::Skipped(reason)) => {
                    summary.skipped += 1;
                    log::debug!(
                        "Skipped transfer {}#{} on {}: {:?}",
                        transfer.tx_id,
                        transfer.log_index,
                        transfer.contract.short(),
                        reason
                    );
                }
                Ok(classification) => {
                    match classification {
                        Classification::Buy => summary.buys += 1,
                        Classification::Sell => summary.sells += 1,
                        Classification::CrossPlatform => summary.cross_platform += 1,
                        Classification::WalletTransfer => summary.wallet_transfers += 1,
                        Classification::Skipped(_) => {}
                    }
                    summary.touched.insert(transfer.contract.clone());
                }
                Err(e) => {
                    summary.rejected += 1;
                    log::warn!("⚠️  Rejected transfer: {}", e);
                }
            }
        }

        summary
    }

    pub fn classify_transfer(
        &self,
        transfer: &TransferEvent,
        settlement_leg: bool,
        store: &mut TokenStateStore,
        timestamp: i64,
    ) -> EngineResult<Classification> {
        let Some(token) = store.get(&transfer.contract) else {
            return Ok(Classification::Skipped(SkipReason::UntrackedContract));
        };

        let update = match self.plan(token, transfer, settlement_leg, timestamp)? {
            Ok(update) => update,
            Err(reason) => return Ok(Classification::Skipped(reason)),
        };

        let Some(token) = store.get_mut(&transfer.contract) else {
            return Ok(Classification::Skipped(SkipReason::UntrackedContract));
        };
        Ok(self.apply(token, update, timestamp))
    }

    /// Decide what a transfer means without touching the token
    fn plan(
        &self,
        token: &TrackedToken,
        transfer: &TransferEvent,
        settlement_leg: bool,
        timestamp: i64,
    ) -> EngineResult<Result<Update, SkipReason>> {
        let amount = transfer.amount;
        if amount.is_zero() {
            return Ok(Err(SkipReason::ZeroAmount));
        }
        if transfer.tx_id == token.creation_tx {
            return Ok(Err(SkipReason::CreationTransaction));
        }
        if transfer.from.is_zero() || transfer.to.is_zero() {
            return Ok(Err(SkipReason::MintOrBurn));
        }

        let malformed =
            |reason: &str| EngineError::malformed(&transfer.tx_id, transfer.log_index, reason);
        let from_platform = transfer.from == self.platform;
        let to_platform = transfer.to == self.platform;

        if from_platform && to_platform {
            return Ok(Err(SkipReason::Infrastructure));
        }

        if from_platform || to_platform {
            let (direction, counterparty, volume) = if from_platform {
                let volume = token
                    .total_buy_volume
                    .checked_add(amount)
                    .ok_or_else(|| malformed("buy volume overflow"))?;
                (TradeDirection::Buy, &transfer.to, volume)
            } else {
                let volume = token
                    .total_sell_volume
                    .checked_add(amount)
                    .ok_or_else(|| malformed("sell volume overflow"))?;
                (TradeDirection::Sell, &transfer.from, volume)
            };

            let is_issuer = token.is_creator(counterparty);
            let holding = match (is_issuer, direction) {
                (false, _) => None,
                (true, TradeDirection::Buy) => Some(
                    token
                        .holding_plus(amount)
                        .ok_or_else(|| malformed("issuer holding overflow"))?,
                ),
                (true, TradeDirection::Sell) => Some(
                    token
                        .holding_minus(amount)
                        .ok_or_else(|| malformed("issuer holding overflow"))?,
                ),
            };

            return Ok(Ok(Update::Trade {
                record: TradeRecord {
                    direction,
                    counterparty: counterparty.clone(),
                    amount,
                    tx_id: transfer.tx_id.clone(),
                    block_number: transfer.block_number,
                    timestamp,
                    is_issuer,
                },
                volume,
                holding,
            }));
        }

        if self.is_infrastructure(&transfer.from) || self.is_infrastructure(&transfer.to) {
            return Ok(Err(SkipReason::Infrastructure));
        }

        if self.exchanges.is_exchange(&transfer.to) {
            let Some(history) = token.buy_history(&transfer.from) else {
                return Ok(Err(SkipReason::NoBuyHistory));
            };
            let holding = if token.is_creator(&transfer.from) {
                Some(
                    token
                        .holding_minus(amount)
                        .ok_or_else(|| malformed("issuer holding overflow"))?,
                )
            } else {
                None
            };

            return Ok(Ok(Update::Exit {
                trade: CrossPlatformTrade {
                    seller: transfer.from.clone(),
                    exchange: transfer.to.clone(),
                    amount,
                    tx_id: transfer.tx_id.clone(),
                    block_number: transfer.block_number,
                    timestamp,
                    total_previously_bought: history.total_bought,
                    previous_buy_count: history.buy_count,
                    seconds_since_first_buy: timestamp
                        .saturating_sub(history.first_buy_timestamp)
                        .max(0),
                },
                holding,
            }));
        }

        if !token.unique_buyers.contains(&transfer.from) {
            return Ok(Err(SkipReason::UnknownSource));
        }
        if settlement_leg {
            return Ok(Err(SkipReason::SettlementLeg));
        }

        let inbound = token.is_creator(&transfer.to);
        let outbound = token.is_creator(&transfer.from);
        let holding = match (inbound, outbound) {
            (true, false) => Some(
                token
                    .holding_plus(amount)
                    .ok_or_else(|| malformed("issuer holding overflow"))?,
            ),
            (false, true) => Some(
                token
                    .holding_minus(amount)
                    .ok_or_else(|| malformed("issuer holding overflow"))?,
            ),
            _ => None,
        };

        Ok(Ok(Update::Wallet {
            transfer: WalletTransfer {
                from: transfer.from.clone(),
                to: transfer.to.clone(),
                amount,
                tx_id: transfer.tx_id.clone(),
                block_number: transfer.block_number,
                timestamp,
                transfers_to_destination: token.wallet_transfers_to(&transfer.to) + 1,
            },
            holding,
        }))
    }

    fn apply(&self, token: &mut TrackedToken, update: Update, timestamp: i64) -> Classification {
        token.last_updated = timestamp;

        match update {
            Update::Trade {
                record,
                volume,
                holding,
            } => {
                if let Some(holding) = holding {
                    token.issuer_residual_holding = holding;
                }
                let classification = match record.direction {
                    TradeDirection::Buy => {
                        token.buy_count += 1;
                        token.total_buy_volume = volume;
                        token.unique_buyers.insert(record.counterparty.clone());
                        Classification::Buy
                    }
                    TradeDirection::Sell => {
                        token.sell_count += 1;
                        token.total_sell_volume = volume;
                        token.unique_sellers.insert(record.counterparty.clone());
                        Classification::Sell
                    }
                };
                let label: &str = record.direction.into();
                log::debug!(
                    "{} {} {} by {}{}",
                    label,
                    record.amount,
                    token.address.short(),
                    record.counterparty.short(),
                    if record.is_issuer { " (issuer)" } else { "" }
                );
                token.trades.push(record);
                classification
            }
            Update::Exit { trade, holding } => {
                if let Some(holding) = holding {
                    token.issuer_residual_holding = holding;
                }
                log::info!(
                    "🔀 Cross-platform exit on {}: {} sent {} to {} ({}s after first buy)",
                    token.address.short(),
                    trade.seller.short(),
                    trade.amount,
                    trade.exchange.short(),
                    trade.seconds_since_first_buy
                );
                token.cross_platform_trades.push(trade);
                Classification::CrossPlatform
            }
            Update::Wallet { transfer, holding } => {
                if let Some(holding) = holding {
                    token.issuer_residual_holding = holding;
                }
                if transfer.transfers_to_destination > self.distribution_threshold {
                    log::info!(
                        "📦 Distribution pattern on {}: {} has received {} wallet transfers",
                        token.address.short(),
                        transfer.to,
                        transfer.transfers_to_destination
                    );
                }
                token.wallet_transfers.push(transfer);
                Classification::WalletTransfer
            }
        }
    }
}
