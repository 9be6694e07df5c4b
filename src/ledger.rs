//! Ledger access seam
//!
//! The engine never talks to a node directly; it consumes this trait. The
//! production implementation is [`crate::rpc::JsonRpcLedger`], tests use
//! scripted in-memory ledgers.

use crate::errors::EngineResult;
use crate::types::{Address, BlockHeader, LogEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Provider-side filter id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterHandle(pub String);

/// Log filter registration: optional contract restriction plus topic slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventShape {
    pub contracts: Vec<Address>,
    pub topics: Vec<Option<String>>,
}

impl EventShape {
    /// Every token `Transfer` emitted by any contract
    pub fn token_transfers() -> Self {
        Self {
            contracts: Vec::new(),
            topics: vec![Some(TRANSFER_EVENT_TOPIC.to_string())],
        }
    }
}

/// Read-only token methods the metadata probe uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractMethod {
    Name,
    Symbol,
    Decimals,
}

impl ContractMethod {
    /// 4-byte selector as 0x-prefixed calldata
    pub fn selector(&self) -> &'static str {
        match self {
            ContractMethod::Name => "0x06fdde03",
            ContractMethod::Symbol => "0x95d89b41",
            ContractMethod::Decimals => "0x313ce567",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractMethod::Name => "name()",
            ContractMethod::Symbol => "symbol()",
            ContractMethod::Decimals => "decimals()",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_id: String,
    /// Transaction signer
    pub from: Address,
    pub to: Option<Address>,
    pub block_number: u64,
    pub succeeded: bool,
}

#[async_trait]
pub trait LedgerFacade: Send + Sync {
    async fn current_block_number(&self) -> EngineResult<u64>;

    /// Push new heads into `sender` until it closes
    ///
    /// Returning `Err` is the subscription's error callback: the stream is
    /// over and the caller decides whether that is fatal.
    async fn subscribe_new_blocks(&self, sender: mpsc::Sender<BlockHeader>) -> EngineResult<()>;

    async fn create_event_filter(&self, shape: &EventShape) -> EngineResult<FilterHandle>;

    /// Logs since the previous poll; `FilterInvalid` when the handle is unknown
    async fn poll_filter_changes(&self, handle: &FilterHandle) -> EngineResult<Vec<LogEvent>>;

    async fn uninstall_filter(&self, handle: &FilterHandle) -> EngineResult<bool>;

    /// Raw return data of a read-only call
    async fn call(&self, contract: &Address, method: ContractMethod) -> EngineResult<Vec<u8>>;

    async fn get_transaction_receipt(&self, tx_id: &str)
        -> EngineResult<Option<TransactionReceipt>>;
}
