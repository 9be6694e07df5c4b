//! Partition a log batch by transaction id
//!
//! Intra-transaction order is the only signal we have for "which step came
//! last", so the grouper never reorders: groups appear in first-seen order and
//! each keeps its logs in their original relative order.

use crate::types::LogEvent;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionGroup {
    pub tx_id: String,
    pub logs: Vec<LogEvent>,
}

pub fn group_by_transaction(logs: Vec<LogEvent>) -> Vec<TransactionGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<TransactionGroup> = Vec::new();

    for log in logs {
        match index.get(&log.tx_id) {
            Some(&position) => groups[position].logs.push(log),
            None => {
                index.insert(log.tx_id.clone(), groups.len());
                groups.push(TransactionGroup {
                    tx_id: log.tx_id.clone(),
                    logs: vec![log],
                });
            }
        }
    }

    groups
}
