//! Error taxonomy for the monitor engine
//!
//! Every fallible operation in the crate returns [`EngineResult`]. Only
//! [`EngineError::RetriesExhausted`] and [`EngineError::Config`] are fatal; the
//! rest are recovered or recorded where they occur.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// RPC call failed at the transport level
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider no longer recognizes the filter handle (expired or evicted)
    #[error("Event filter is no longer recognized by the provider")]
    FilterInvalid,

    #[error("Metadata probe failed for {contract}: {reason}")]
    MetadataProbe { contract: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Malformed event (tx {tx_id}, log {log_index}): {reason}")]
    MalformedEvent {
        tx_id: String,
        log_index: u64,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Maximum retry attempts exceeded after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl EngineError {
    /// Errors worth another attempt after a backoff delay
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }

    /// Errors that must stop the runtime
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::RetriesExhausted { .. } | EngineError::Config(_)
        )
    }

    pub fn malformed(tx_id: &str, log_index: u64, reason: impl Into<String>) -> Self {
        EngineError::MalformedEvent {
            tx_id: tx_id.to_string(),
            log_index,
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(format!("JSON encoding: {}", e))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Transport(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_and_fatal_classes() {
        assert!(EngineError::Transport("timeout".into()).is_retriable());
        assert!(!EngineError::FilterInvalid.is_retriable());
        assert!(!EngineError::FilterInvalid.is_fatal());

        let exhausted = EngineError::RetriesExhausted {
            attempts: 5,
            last_error: "connection refused".into(),
        };
        assert!(exhausted.is_fatal());
        assert!(!exhausted.is_retriable());
        assert!(EngineError::Config("RPC_URL".into()).is_fatal());
    }

    #[test]
    fn test_malformed_message() {
        let err = EngineError::malformed("0xabc", 7, "missing topics");
        assert_eq!(
            err.to_string(),
            "Malformed event (tx 0xabc, log 7): missing topics"
        );
    }
}
