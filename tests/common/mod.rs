//! Shared fixtures: a scripted ledger and log builders

#![allow(dead_code)]

use async_trait::async_trait;
use launch_monitor::config::{EngineConfig, RetryConfig};
use launch_monitor::errors::{EngineError, EngineResult};
use launch_monitor::ledger::{
    ContractMethod, EventShape, FilterHandle, LedgerFacade, TransactionReceipt,
    TRANSFER_EVENT_TOPIC,
};
use launch_monitor::types::{Address, BlockHeader, LogEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn addr(suffix: &str) -> Address {
    Address::parse(&format!("0x{:0>40}", suffix)).unwrap()
}

pub fn platform() -> Address {
    addr("9999")
}

pub fn token() -> Address {
    addr("aa")
}

pub fn exchange() -> Address {
    addr("dec5")
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::for_platform("http://localhost:8545", platform());
    config.exchange_addresses = vec![exchange()];
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 2,
    };
    config
}

pub fn header(number: u64, timestamp: i64) -> BlockHeader {
    BlockHeader { number, timestamp }
}

fn topic_for(address: &Address) -> String {
    format!("0x{:0>64}", address.as_str().trim_start_matches("0x"))
}

pub fn transfer_log(
    contract: &Address,
    from: &Address,
    to: &Address,
    amount: u64,
    tx_id: &str,
    log_index: u64,
) -> LogEvent {
    LogEvent {
        contract: contract.clone(),
        topics: vec![TRANSFER_EVENT_TOPIC.to_string(), topic_for(from), topic_for(to)],
        data: format!("0x{:064x}", amount),
        tx_id: tx_id.to_string(),
        block_number: 100,
        log_index,
    }
}

/// Scenario A creation transaction: mint into the platform, allocation to 0xcafe
pub fn creation_logs(tx_id: &str) -> Vec<LogEvent> {
    launch_logs(&token(), &addr("cafe"), tx_id)
}

/// Launch of `contract` with the full supply allocated to `creator`
pub fn launch_logs(contract: &Address, creator: &Address, tx_id: &str) -> Vec<LogEvent> {
    vec![
        transfer_log(contract, &Address::zero(), &platform(), 1_000_000, tx_id, 0),
        transfer_log(contract, &platform(), creator, 1_000_000, tx_id, 1),
    ]
}

fn abi_string(text: &str) -> Vec<u8> {
    let mut out = vec![0u8; 64];
    out[31] = 0x20;
    out[63] = text.len() as u8;
    let mut body = text.as_bytes().to_vec();
    body.resize(32, 0);
    out.extend(body);
    out
}

/// Ledger whose poll results are queued by the test
#[derive(Default)]
pub struct ScriptedLedger {
    polls: Mutex<VecDeque<EngineResult<Vec<LogEvent>>>>,
    filters_created: Mutex<u32>,
    filters_uninstalled: Mutex<u32>,
    metadata_calls: Mutex<u32>,
    call_delays: Mutex<HashMap<Address, u64>>,
    in_flight: Mutex<u32>,
    max_in_flight: Mutex<u32>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_poll(&self, result: EngineResult<Vec<LogEvent>>) {
        self.polls.lock().unwrap().push_back(result);
    }

    pub fn filters_created(&self) -> u32 {
        *self.filters_created.lock().unwrap()
    }

    pub fn filters_uninstalled(&self) -> u32 {
        *self.filters_uninstalled.lock().unwrap()
    }

    pub fn metadata_calls(&self) -> u32 {
        *self.metadata_calls.lock().unwrap()
    }

    /// Delay every contract call against `contract`
    pub fn set_call_delay(&self, contract: &Address, millis: u64) {
        self.call_delays.lock().unwrap().insert(contract.clone(), millis);
    }

    /// Most contract calls observed running at once
    pub fn max_in_flight(&self) -> u32 {
        *self.max_in_flight.lock().unwrap()
    }
}

#[async_trait]
impl LedgerFacade for ScriptedLedger {
    async fn current_block_number(&self) -> EngineResult<u64> {
        Ok(100)
    }

    async fn subscribe_new_blocks(&self, _sender: mpsc::Sender<BlockHeader>) -> EngineResult<()> {
        Ok(())
    }

    async fn create_event_filter(&self, _shape: &EventShape) -> EngineResult<FilterHandle> {
        let mut created = self.filters_created.lock().unwrap();
        *created += 1;
        Ok(FilterHandle(format!("0x{:x}", *created)))
    }

    async fn poll_filter_changes(&self, _handle: &FilterHandle) -> EngineResult<Vec<LogEvent>> {
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn uninstall_filter(&self, _handle: &FilterHandle) -> EngineResult<bool> {
        *self.filters_uninstalled.lock().unwrap() += 1;
        Ok(true)
    }

    async fn call(&self, contract: &Address, method: ContractMethod) -> EngineResult<Vec<u8>> {
        *self.metadata_calls.lock().unwrap() += 1;
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            *in_flight += 1;
            let mut max = self.max_in_flight.lock().unwrap();
            *max = (*max).max(*in_flight);
        }
        let delay = self.call_delays.lock().unwrap().get(contract).copied();
        if let Some(millis) = delay {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        *self.in_flight.lock().unwrap() -= 1;

        match method {
            ContractMethod::Name => Ok(abi_string("Cafe Token")),
            ContractMethod::Symbol => Ok(abi_string("CAFE")),
            ContractMethod::Decimals => {
                Err(EngineError::Transport("execution reverted".to_string()))
            }
        }
    }

    async fn get_transaction_receipt(
        &self,
        _tx_id: &str,
    ) -> EngineResult<Option<TransactionReceipt>> {
        Ok(None)
    }
}
