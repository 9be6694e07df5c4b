//! Token creation detection
//!
//! A launch shows up as a mint of a fresh contract plus a deposit of that
//! contract into the platform, both inside one transaction. Detection runs in
//! three steps so the network-bound middle step can be fanned out:
//!
//! 1. [`TokenCreationDetector::find_candidates`]: pure scan of a decoded tx
//! 2. [`TokenCreationDetector::enrich`]: metadata probe, optional receipt
//! 3. [`TokenCreationDetector::finalize`]: pure, builds the [`TrackedToken`]

use crate::decoder::{decode_abi_string, decode_abi_u8, DecodedTransaction};
use crate::errors::{EngineError, EngineResult};
use crate::ledger::{ContractMethod, LedgerFacade};
use crate::risk::RiskAssessment;
use crate::state::TokenStateStore;
use crate::types::{Address, TradeDirection, TradeRecord, TrackedToken, TransferEvent};
use alloy_primitives::{I256, U256};
use std::collections::{BTreeSet, HashSet};

/// How the creator of a new token is identified
///
/// Both strategies are approximations: the last transfer of the creation tx
/// usually lands in the creator's wallet, and the signer usually is the
/// creator, but routers and relayers break either assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatorStrategy {
    LastLogDestination,
    TransactionSigner,
}

impl CreatorStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "last_log" => Some(CreatorStrategy::LastLogDestination),
            "signer" => Some(CreatorStrategy::TransactionSigner),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CreatorStrategy::LastLogDestination => "last_log",
            CreatorStrategy::TransactionSigner => "signer",
        }
    }
}

/// Destination of the highest-indexed transfer
pub fn last_log_destination(transfers: &[TransferEvent]) -> Option<Address> {
    transfers
        .iter()
        .max_by_key(|t| t.log_index)
        .map(|t| t.to.clone())
}

/// A contract that passed the mint + deposit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationCandidate {
    pub contract: Address,
    pub tx_id: String,
    pub block_number: u64,
    pub timestamp: i64,
    pub total_supply: U256,
    /// This contract's transfers in the creation tx, sorted by log index
    pub transfers: Vec<TransferEvent>,
}

/// Network-sourced facts about a candidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub signer: Option<Address>,
    pub data_errors: Vec<String>,
}

pub struct TokenCreationDetector {
    platform: Address,
    excluded: HashSet<Address>,
    strategy: CreatorStrategy,
}

impl TokenCreationDetector {
    pub fn new(platform: Address, excluded: HashSet<Address>, strategy: CreatorStrategy) -> Self {
        Self {
            platform,
            excluded,
            strategy,
        }
    }

    pub fn strategy(&self) -> CreatorStrategy {
        self.strategy
    }

    pub fn find_candidates(
        &self,
        tx: &DecodedTransaction,
        store: &TokenStateStore,
        timestamp: i64,
    ) -> Vec<CreationCandidate> {
        let mut seen: HashSet<&Address> = HashSet::new();
        let mut candidates = Vec::new();

        for deposit in tx.transfers.iter().filter(|t| t.to == self.platform) {
            let contract = &deposit.contract;
            if !seen.insert(contract) {
                continue;
            }
            if store.contains(contract) || self.excluded.contains(contract) {
                continue;
            }

            let mut transfers: Vec<TransferEvent> = tx
                .transfers
                .iter()
                .filter(|t| t.contract == *contract)
                .cloned()
                .collect();
            transfers.sort_by_key(|t| t.log_index);

            let mut minted = false;
            let mut total_supply = U256::ZERO;
            let mut overflow = false;
            for mint in transfers.iter().filter(|t| t.is_mint()) {
                minted = true;
                match total_supply.checked_add(mint.amount) {
                    Some(sum) => total_supply = sum,
                    None => overflow = true,
                }
            }

            if !minted {
                log::debug!(
                    "Deposit of {} into platform without mint in tx {}, not a launch",
                    contract.short(),
                    tx.tx_id
                );
                continue;
            }
            if overflow {
                log::warn!("⚠️  Mint total overflows for {} in tx {}", contract, tx.tx_id);
                continue;
            }

            candidates.push(CreationCandidate {
                contract: contract.clone(),
                tx_id: tx.tx_id.clone(),
                block_number: tx.block_number,
                timestamp,
                total_supply,
                transfers,
            });
        }

        candidates
    }

    pub async fn enrich(
        &self,
        ledger: &dyn LedgerFacade,
        candidate: &CreationCandidate,
    ) -> Enrichment {
        let mut enrichment = Enrichment::default();
        let contract = &candidate.contract;

        match probe(ledger, contract, ContractMethod::Name, decode_abi_string).await {
            Ok(name) => enrichment.name = Some(name),
            Err(e) => enrichment.data_errors.push(e.to_string()),
        }
        match probe(ledger, contract, ContractMethod::Symbol, decode_abi_string).await {
            Ok(symbol) => enrichment.symbol = Some(symbol),
            Err(e) => enrichment.data_errors.push(e.to_string()),
        }
        match probe(ledger, contract, ContractMethod::Decimals, decode_abi_u8).await {
            Ok(decimals) => enrichment.decimals = Some(decimals),
            Err(e) => enrichment.data_errors.push(e.to_string()),
        }

        if self.strategy == CreatorStrategy::TransactionSigner {
            match ledger.get_transaction_receipt(&candidate.tx_id).await {
                Ok(Some(receipt)) => enrichment.signer = Some(receipt.from),
                Ok(None) => enrichment
                    .data_errors
                    .push(format!("receipt for {} unavailable", candidate.tx_id)),
                Err(e) => enrichment
                    .data_errors
                    .push(format!("receipt for {} failed: {}", candidate.tx_id, e)),
            }
        }

        enrichment
    }

    /// Build the tracked record; `None` only for a candidate with no transfers
    pub fn finalize(
        &self,
        candidate: CreationCandidate,
        enrichment: Enrichment,
    ) -> Option<TrackedToken> {
        let Enrichment {
            name,
            symbol,
            decimals,
            signer,
            mut data_errors,
        } = enrichment;

        let last_destination = last_log_destination(&candidate.transfers)?;
        let (creator, creator_source) = match (self.strategy, signer) {
            (CreatorStrategy::TransactionSigner, Some(signer)) => {
                (signer, CreatorStrategy::TransactionSigner)
            }
            (CreatorStrategy::TransactionSigner, None) => {
                data_errors
                    .push("signer unavailable, creator taken from last transfer".to_string());
                (last_destination, CreatorStrategy::LastLogDestination)
            }
            (CreatorStrategy::LastLogDestination, _) => {
                (last_destination, CreatorStrategy::LastLogDestination)
            }
        };

        let mut allocation: Option<U256> = None;
        for transfer in candidate
            .transfers
            .iter()
            .filter(|t| t.from == self.platform && t.to == creator)
        {
            let sum = allocation.unwrap_or(U256::ZERO).checked_add(transfer.amount);
            match sum {
                Some(sum) => allocation = Some(sum),
                None => {
                    data_errors.push("creator allocation overflows".to_string());
                    allocation = None;
                    break;
                }
            }
        }

        let issuer_holding_defaulted = allocation.is_none();
        let allocation = allocation.unwrap_or(U256::ZERO);
        let issuer_residual_holding = match I256::try_from(allocation) {
            Ok(holding) => holding,
            Err(_) => {
                data_errors.push("creator allocation exceeds signed range".to_string());
                I256::ZERO
            }
        };

        let mut trades = Vec::new();
        if !allocation.is_zero() {
            trades.push(TradeRecord {
                direction: TradeDirection::Buy,
                counterparty: creator.clone(),
                amount: allocation,
                tx_id: candidate.tx_id.clone(),
                block_number: candidate.block_number,
                timestamp: candidate.timestamp,
                is_issuer: true,
            });
        }

        let mut unique_buyers = BTreeSet::new();
        unique_buyers.insert(creator.clone());

        Some(TrackedToken {
            address: candidate.contract,
            name,
            symbol,
            decimals,
            total_supply: candidate.total_supply,
            creator,
            creator_source: creator_source.as_str().to_string(),
            creation_block: candidate.block_number,
            creation_tx: candidate.tx_id,
            created_at: candidate.timestamp,
            issuer_residual_holding,
            issuer_holding_defaulted,
            buy_count: 1,
            sell_count: 0,
            unique_buyers,
            unique_sellers: BTreeSet::new(),
            total_buy_volume: allocation,
            total_sell_volume: U256::ZERO,
            trades,
            wallet_transfers: Vec::new(),
            cross_platform_trades: Vec::new(),
            data_errors,
            risk: RiskAssessment::default(),
            last_updated: candidate.timestamp,
        })
    }
}

async fn probe<T>(
    ledger: &dyn LedgerFacade,
    contract: &Address,
    method: ContractMethod,
    decode: fn(&[u8]) -> Option<T>,
) -> EngineResult<T> {
    let failed = |reason: String| EngineError::MetadataProbe {
        contract: contract.to_string(),
        reason,
    };

    let raw = ledger
        .call(contract, method)
        .await
        .map_err(|e| failed(format!("{}: {}", method.as_str(), e)))?;
    decode(&raw).ok_or_else(|| failed(format!("{}: undecodable return data", method.as_str())))
}
