//! JSON-RPC over HTTP implementation of [`LedgerFacade`]
//!
//! New heads are discovered by polling `eth_getBlockByNumber("latest")`; the
//! rest of the trait maps one-to-one onto `eth_*` methods.

use crate::config::RetryConfig;
use crate::errors::{EngineError, EngineResult};
use crate::ledger::{ContractMethod, EventShape, FilterHandle, LedgerFacade, TransactionReceipt};
use crate::retry::ExponentialBackoff;
use crate::types::{Address, BlockHeader, LogEvent};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Map a JSON-RPC error object onto the engine taxonomy
///
/// Providers phrase filter eviction differently ("filter not found",
/// "filter does not exist", "filter expired"); all of them mean the handle
/// must be recreated.
pub fn classify_rpc_error(code: i64, message: &str) -> EngineError {
    let lower = message.to_ascii_lowercase();
    let filter_gone = lower.contains("filter")
        && ["not found", "does not exist", "expired", "unknown"]
            .iter()
            .any(|needle| lower.contains(needle));

    if filter_gone {
        EngineError::FilterInvalid
    } else {
        EngineError::Transport(format!("{} (code {})", message, code))
    }
}

pub fn parse_hex_u64(raw: &str) -> EngineResult<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| EngineError::Transport(format!("invalid hex quantity '{}': {}", raw, e)))
}

/// Log object as returned by `eth_getFilterChanges`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub transaction_hash: Option<String>,
    pub block_number: Option<String>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RpcLog {
    /// `None` for pending or removed logs
    pub fn into_log_event(self) -> EngineResult<Option<LogEvent>> {
        if self.removed {
            return Ok(None);
        }
        let (Some(tx_id), Some(block_number), Some(log_index)) =
            (self.transaction_hash, self.block_number, self.log_index)
        else {
            return Ok(None);
        };

        Ok(Some(LogEvent {
            contract: Address::parse(&self.address)
                .map_err(|_| EngineError::malformed(&tx_id, 0, "invalid emitting contract"))?,
            topics: self.topics,
            data: self.data,
            block_number: parse_hex_u64(&block_number)?,
            log_index: parse_hex_u64(&log_index)?,
            tx_id,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    from: String,
    to: Option<String>,
    block_number: String,
    status: Option<String>,
}

impl RpcReceipt {
    fn into_receipt(self) -> EngineResult<TransactionReceipt> {
        let to = match self.to {
            Some(to) => Some(Address::parse(&to)?),
            None => None,
        };
        Ok(TransactionReceipt {
            from: Address::parse(&self.from)?,
            to,
            block_number: parse_hex_u64(&self.block_number)?,
            // Pre-byzantium receipts carry no status
            succeeded: self.status.as_deref().map(|s| s == "0x1").unwrap_or(true),
            tx_id: self.transaction_hash,
        })
    }
}

pub struct JsonRpcLedger {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    poll_interval: Duration,
    retry: RetryConfig,
}

impl JsonRpcLedger {
    pub fn new(url: &str, poll_interval_ms: u64, retry: RetryConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            retry,
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> EngineResult<T> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(classify_rpc_error(error.code, &error.message));
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| {
                EngineError::Transport(format!("{}: unexpected result shape: {}", method, e))
            })
    }

    async fn latest_header(&self) -> EngineResult<BlockHeader> {
        let block: Option<RpcBlock> = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let block =
            block.ok_or_else(|| EngineError::Transport("latest block unavailable".to_string()))?;

        let timestamp = parse_hex_u64(&block.timestamp)?;
        Ok(BlockHeader {
            number: parse_hex_u64(&block.number)?,
            timestamp: i64::try_from(timestamp).map_err(|_| {
                EngineError::Transport(format!("block timestamp out of range: {}", timestamp))
            })?,
        })
    }
}

fn decode_hex_payload(raw: &str) -> EngineResult<Vec<u8>> {
    hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
        .map_err(|e| EngineError::Transport(format!("invalid hex payload: {}", e)))
}

#[async_trait]
impl LedgerFacade for JsonRpcLedger {
    async fn current_block_number(&self) -> EngineResult<u64> {
        let raw: String = self.request("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&raw)
    }

    async fn subscribe_new_blocks(&self, sender: mpsc::Sender<BlockHeader>) -> EngineResult<()> {
        let mut backoff = ExponentialBackoff::from_config(&self.retry);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_seen: Option<u64> = None;

        log::info!(
            "📡 Polling new heads every {}ms from {}",
            self.poll_interval.as_millis(),
            self.url
        );

        loop {
            interval.tick().await;
            if sender.is_closed() {
                log::info!("Block receiver dropped, stopping head subscription");
                return Ok(());
            }

            match self.latest_header().await {
                Ok(header) => {
                    backoff.reset();
                    // Only the newest head is emitted; skipped numbers are covered by the filter
                    if last_seen.map_or(true, |seen| header.number > seen) {
                        last_seen = Some(header.number);
                        if sender.send(header).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    log::warn!("⚠️  Head poll failed: {}", e);
                    if backoff.sleep().await.is_err() {
                        return Err(EngineError::RetriesExhausted {
                            attempts: backoff.attempts() + 1,
                            last_error: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn create_event_filter(&self, shape: &EventShape) -> EngineResult<FilterHandle> {
        let mut filter = json!({
            "fromBlock": "latest",
            "topics": shape.topics,
        });
        if !shape.contracts.is_empty() {
            let contracts: Vec<&str> = shape.contracts.iter().map(Address::as_str).collect();
            filter["address"] = json!(contracts);
        }

        let id: String = self.request("eth_newFilter", json!([filter])).await?;
        Ok(FilterHandle(id))
    }

    async fn poll_filter_changes(&self, handle: &FilterHandle) -> EngineResult<Vec<LogEvent>> {
        let raw: Vec<RpcLog> = self
            .request("eth_getFilterChanges", json!([handle.0]))
            .await?;

        let mut logs = Vec::with_capacity(raw.len());
        for entry in raw {
            match entry.into_log_event() {
                Ok(Some(log)) => logs.push(log),
                Ok(None) => {}
                Err(e) => log::debug!("Dropping undecodable log: {}", e),
            }
        }
        Ok(logs)
    }

    async fn uninstall_filter(&self, handle: &FilterHandle) -> EngineResult<bool> {
        self.request("eth_uninstallFilter", json!([handle.0])).await
    }

    async fn call(&self, contract: &Address, method: ContractMethod) -> EngineResult<Vec<u8>> {
        let raw: String = self
            .request(
                "eth_call",
                json!([{ "to": contract.as_str(), "data": method.selector() }, "latest"]),
            )
            .await?;
        decode_hex_payload(&raw)
    }

    async fn get_transaction_receipt(
        &self,
        tx_id: &str,
    ) -> EngineResult<Option<TransactionReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", json!([tx_id]))
            .await?;
        receipt.map(RpcReceipt::into_receipt).transpose()
    }
}
