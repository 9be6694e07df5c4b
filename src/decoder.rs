//! Decoding boundary: raw logs in, tagged transfers out
//!
//! Nothing past this module inspects topic strings or data payloads.

use crate::errors::{EngineError, EngineResult};
use crate::grouper::TransactionGroup;
use crate::ledger::TRANSFER_EVENT_TOPIC;
use crate::types::{Address, LogEvent, TransferEvent};
use alloy_primitives::U256;

/// One transaction's decodable transfers, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub tx_id: String,
    pub block_number: u64,
    pub transfers: Vec<TransferEvent>,
    /// Logs dropped as malformed
    pub skipped: usize,
}

impl DecodedTransaction {
    /// True when any transfer in the transaction moved `asset`
    pub fn moves_asset(&self, asset: &Address) -> bool {
        self.transfers.iter().any(|t| t.contract == *asset)
    }
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(stripped).ok()
}

pub fn decode_transfer(log: &LogEvent) -> EngineResult<TransferEvent> {
    let malformed = |reason: &str| EngineError::malformed(&log.tx_id, log.log_index, reason);

    if log.topics.len() != 3 {
        return Err(malformed(&format!("expected 3 topics, got {}", log.topics.len())));
    }
    if !log.topics[0].eq_ignore_ascii_case(TRANSFER_EVENT_TOPIC) {
        return Err(malformed("not a Transfer event"));
    }

    let from = decode_hex(&log.topics[1])
        .and_then(|word| Address::from_word(&word))
        .ok_or_else(|| malformed("invalid source topic"))?;
    let to = decode_hex(&log.topics[2])
        .and_then(|word| Address::from_word(&word))
        .ok_or_else(|| malformed("invalid destination topic"))?;

    let data = decode_hex(&log.data).ok_or_else(|| malformed("data is not hex"))?;
    if data.len() != 32 {
        return Err(malformed(&format!("expected 32 data bytes, got {}", data.len())));
    }
    let amount = U256::try_from_be_slice(&data).ok_or_else(|| malformed("amount out of range"))?;

    Ok(TransferEvent {
        contract: log.contract.clone(),
        from,
        to,
        amount,
        tx_id: log.tx_id.clone(),
        block_number: log.block_number,
        log_index: log.log_index,
    })
}

/// Decode a group, skipping (and logging) malformed entries
pub fn decode_group(group: &TransactionGroup) -> DecodedTransaction {
    let mut transfers = Vec::with_capacity(group.logs.len());
    let mut skipped = 0;

    for log in &group.logs {
        match decode_transfer(log) {
            Ok(transfer) => transfers.push(transfer),
            Err(e) => {
                skipped += 1;
                log::debug!("Skipping log: {}", e);
            }
        }
    }

    DecodedTransaction {
        tx_id: group.tx_id.clone(),
        block_number: group.logs.first().map(|l| l.block_number).unwrap_or_default(),
        transfers,
        skipped,
    }
}

fn word_to_usize(word: &[u8]) -> Option<usize> {
    if word.len() != 32 || word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(tail)).ok()
}

/// Decode an ABI `string` return value
///
/// Some older tokens return `bytes32` for `name()`/`symbol()`; a single
/// 32-byte word is read as a NUL-padded string.
pub fn decode_abi_string(data: &[u8]) -> Option<String> {
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        let text = std::str::from_utf8(&data[..end]).ok()?;
        return (!text.is_empty()).then(|| text.to_string());
    }

    let offset = word_to_usize(data.get(..32)?)?;
    let len_end = offset.checked_add(32)?;
    let len = word_to_usize(data.get(offset..len_end)?)?;
    let bytes = data.get(len_end..len_end.checked_add(len)?)?;

    String::from_utf8(bytes.to_vec()).ok()
}

/// Decode a `uint8` return value
pub fn decode_abi_u8(data: &[u8]) -> Option<u8> {
    let value = word_to_usize(data.get(..32)?)?;
    u8::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x00000000000000000000000000000000000000aa";

    fn topic_for(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn transfer_log(from: &str, to: &str, amount: u64, log_index: u64) -> LogEvent {
        LogEvent {
            contract: Address::parse(CONTRACT).unwrap(),
            topics: vec![
                TRANSFER_EVENT_TOPIC.to_string(),
                topic_for(from),
                topic_for(to),
            ],
            data: format!("0x{:064x}", amount),
            tx_id: "0xtx".to_string(),
            block_number: 42,
            log_index,
        }
    }

    #[test]
    fn test_decode_valid_transfer() {
        let log = transfer_log(
            "0x0000000000000000000000000000000000000000",
            "0x000000000000000000000000000000000000CAFE",
            1_000_000,
            3,
        );

        let transfer = decode_transfer(&log).unwrap();
        assert!(transfer.is_mint());
        assert_eq!(transfer.to.as_str(), "0x000000000000000000000000000000000000cafe");
        assert_eq!(transfer.amount, U256::from(1_000_000u64));
        assert_eq!(transfer.log_index, 3);
        assert_eq!(transfer.block_number, 42);
    }

    #[test]
    fn test_decode_rejects_wrong_signature() {
        let mut log = transfer_log(CONTRACT, CONTRACT, 1, 0);
        log.topics[0] = format!("0x{}", "11".repeat(32));
        assert!(matches!(
            decode_transfer(&log),
            Err(EngineError::MalformedEvent { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_non_indexed_transfer() {
        // Transfer with the value and addresses all in data (topics len 1)
        let mut log = transfer_log(CONTRACT, CONTRACT, 1, 0);
        log.topics.truncate(1);
        assert!(decode_transfer(&log).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_data() {
        let mut log = transfer_log(CONTRACT, CONTRACT, 1, 0);
        log.data = "0x1234".to_string();
        assert!(decode_transfer(&log).is_err());

        log.data = "not hex".to_string();
        assert!(decode_transfer(&log).is_err());
    }

    #[test]
    fn test_decode_group_skips_malformed() {
        let mut bad = transfer_log(CONTRACT, CONTRACT, 5, 1);
        bad.data = "0x".to_string();
        let group = TransactionGroup {
            tx_id: "0xtx".to_string(),
            logs: vec![
                transfer_log(CONTRACT, CONTRACT, 1, 0),
                bad,
                transfer_log(CONTRACT, CONTRACT, 2, 2),
            ],
        };

        let decoded = decode_group(&group);
        assert_eq!(decoded.transfers.len(), 2);
        assert_eq!(decoded.skipped, 1);
        assert_eq!(decoded.transfers[1].log_index, 2);
        assert_eq!(decoded.block_number, 42);
    }

    fn abi_string(text: &str) -> Vec<u8> {
        let mut out = vec![0u8; 64];
        out[31] = 0x20;
        out[63] = text.len() as u8;
        let mut body = text.as_bytes().to_vec();
        body.resize(((text.len() + 31) / 32).max(1) * 32, 0);
        out.extend(body);
        out
    }

    #[test]
    fn test_decode_abi_string() {
        assert_eq!(decode_abi_string(&abi_string("Pepe Coin")), Some("Pepe Coin".to_string()));
        assert_eq!(decode_abi_string(&[]), None);
        // Truncated payload
        let mut truncated = abi_string("LONGNAME");
        truncated.truncate(70);
        assert_eq!(decode_abi_string(&truncated), None);
    }

    #[test]
    fn test_decode_bytes32_string() {
        let mut word = [0u8; 32];
        word[..4].copy_from_slice(b"MOON");
        assert_eq!(decode_abi_string(&word), Some("MOON".to_string()));
    }

    #[test]
    fn test_decode_abi_u8() {
        let mut word = [0u8; 32];
        word[31] = 18;
        assert_eq!(decode_abi_u8(&word), Some(18));
        word[30] = 1;
        assert_eq!(decode_abi_u8(&word), None);
        assert_eq!(decode_abi_u8(&[0u8; 4]), None);
    }
}
