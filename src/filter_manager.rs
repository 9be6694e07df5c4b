//! Event filter lifecycle
//!
//! Providers evict idle filters without notice. The manager owns the single
//! Transfer filter, recreates it when the provider stops recognizing it, and
//! retries transport failures with backoff. Logs emitted while the filter was
//! gone are not backfilled.

use crate::config::RetryConfig;
use crate::errors::{EngineError, EngineResult};
use crate::ledger::{EventShape, FilterHandle, LedgerFacade};
use crate::retry::retry_with_backoff;
use crate::types::LogEvent;
use std::sync::Arc;

pub struct FilterManager {
    ledger: Arc<dyn LedgerFacade>,
    shape: EventShape,
    handle: Option<FilterHandle>,
    retry: RetryConfig,
    recreations: u64,
    polls: u64,
}

impl FilterManager {
    pub fn new(ledger: Arc<dyn LedgerFacade>, shape: EventShape, retry: RetryConfig) -> Self {
        Self {
            ledger,
            shape,
            handle: None,
            retry,
            recreations: 0,
            polls: 0,
        }
    }

    /// Current handle, creating the filter if there is none
    pub async fn ensure_filter(&mut self) -> EngineResult<FilterHandle> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let ledger = self.ledger.clone();
        let shape = self.shape.clone();
        let handle = retry_with_backoff(&self.retry, "create event filter", || {
            let ledger = ledger.clone();
            let shape = shape.clone();
            async move { ledger.create_event_filter(&shape).await }
        })
        .await?;

        log::info!("🎯 Event filter installed: {}", handle.0);
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Logs since the previous poll
    ///
    /// An unrecognized filter is replaced and an empty batch returned. Only
    /// retry exhaustion (or a non-transport failure) reaches the caller.
    pub async fn poll_changes(&mut self) -> EngineResult<Vec<LogEvent>> {
        let handle = self.ensure_filter().await?;
        self.polls += 1;

        let ledger = self.ledger.clone();
        let result = retry_with_backoff(&self.retry, "poll filter changes", || {
            let ledger = ledger.clone();
            let handle = handle.clone();
            async move { ledger.poll_filter_changes(&handle).await }
        })
        .await;

        match result {
            Ok(logs) => {
                log::debug!("Poll #{} returned {} logs", self.polls, logs.len());
                Ok(logs)
            }
            Err(EngineError::FilterInvalid) => {
                self.recreations += 1;
                log::warn!(
                    "🔄 Filter {} no longer recognized, recreating (recreation #{})",
                    handle.0,
                    self.recreations
                );
                self.handle = None;
                self.ensure_filter().await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Uninstall the filter; failures are logged only
    pub async fn release(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match self.ledger.uninstall_filter(&handle).await {
            Ok(true) => log::info!("✅ Event filter {} uninstalled", handle.0),
            Ok(false) => log::debug!("Event filter {} was already gone", handle.0),
            Err(e) => log::warn!("⚠️  Failed to uninstall filter {}: {}", handle.0, e),
        }
    }

    pub fn handle(&self) -> Option<&FilterHandle> {
        self.handle.as_ref()
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ContractMethod, TransactionReceipt};
    use crate::types::{Address, BlockHeader};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Replays scripted poll results; counts filter installs
    #[derive(Default)]
    struct ScriptedLedger {
        polls: Mutex<VecDeque<EngineResult<Vec<LogEvent>>>>,
        create_failures: Mutex<VecDeque<EngineError>>,
        created: Mutex<u32>,
        uninstalled: Mutex<Vec<FilterHandle>>,
        fail_uninstall: bool,
    }

    impl ScriptedLedger {
        fn with_polls(polls: Vec<EngineResult<Vec<LogEvent>>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Self::default()
            }
        }

        fn failing_creates(failures: Vec<EngineError>) -> Self {
            Self {
                create_failures: Mutex::new(failures.into()),
                ..Self::default()
            }
        }

        fn created(&self) -> u32 {
            *self.created.lock().unwrap()
        }
    }

    #[async_trait]
    impl LedgerFacade for ScriptedLedger {
        async fn current_block_number(&self) -> EngineResult<u64> {
            Ok(1)
        }

        async fn subscribe_new_blocks(
            &self,
            _sender: mpsc::Sender<BlockHeader>,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn create_event_filter(&self, _shape: &EventShape) -> EngineResult<FilterHandle> {
            let mut created = self.created.lock().unwrap();
            *created += 1;
            if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(FilterHandle(format!("0x{}", *created)))
        }

        async fn poll_filter_changes(&self, _handle: &FilterHandle) -> EngineResult<Vec<LogEvent>> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn uninstall_filter(&self, handle: &FilterHandle) -> EngineResult<bool> {
            if self.fail_uninstall {
                return Err(EngineError::Transport("gone".into()));
            }
            self.uninstalled.lock().unwrap().push(handle.clone());
            Ok(true)
        }

        async fn call(
            &self,
            _contract: &Address,
            _method: ContractMethod,
        ) -> EngineResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn get_transaction_receipt(
            &self,
            _tx_id: &str,
        ) -> EngineResult<Option<TransactionReceipt>> {
            Ok(None)
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn make_log(tx_id: &str) -> LogEvent {
        LogEvent {
            contract: Address::zero(),
            topics: Vec::new(),
            data: "0x".to_string(),
            tx_id: tx_id.to_string(),
            block_number: 1,
            log_index: 0,
        }
    }

    #[tokio::test]
    async fn test_ensure_filter_reuses_handle() {
        let ledger = Arc::new(ScriptedLedger::default());
        let mut manager =
            FilterManager::new(ledger.clone(), EventShape::token_transfers(), fast_retry(3));

        let first = manager.ensure_filter().await.unwrap();
        let second = manager.ensure_filter().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.created(), 1);
    }

    #[tokio::test]
    async fn test_filter_install_retries_transport_errors() {
        let ledger = Arc::new(ScriptedLedger::failing_creates(vec![
            EngineError::Transport("connection reset".into()),
            EngineError::Transport("connection reset".into()),
        ]));
        let mut manager =
            FilterManager::new(ledger.clone(), EventShape::token_transfers(), fast_retry(3));

        let handle = manager.ensure_filter().await.unwrap();
        assert_eq!(handle, FilterHandle("0x3".to_string()));
        assert_eq!(ledger.created(), 3);
        assert_eq!(manager.handle(), Some(&handle));
    }

    #[tokio::test]
    async fn test_filter_install_exhaustion_is_fatal() {
        let ledger = Arc::new(ScriptedLedger::failing_creates(vec![
            EngineError::Transport("refused".into()),
            EngineError::Transport("refused".into()),
            EngineError::Transport("refused".into()),
        ]));
        let mut manager =
            FilterManager::new(ledger.clone(), EventShape::token_transfers(), fast_retry(3));

        let err = manager.ensure_filter().await.unwrap_err();
        assert!(matches!(err, EngineError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.is_fatal());
        assert_eq!(ledger.created(), 3);
        assert!(manager.handle().is_none());
    }

    #[tokio::test]
    async fn test_filter_invalid_recovers_silently() {
        let ledger = Arc::new(ScriptedLedger::with_polls(vec![
            Err(EngineError::FilterInvalid),
            Ok(vec![make_log("0xa"), make_log("0xb")]),
        ]));
        let mut manager =
            FilterManager::new(ledger.clone(), EventShape::token_transfers(), fast_retry(3));

        // Recovery poll: empty batch, no error
        let recovered = manager.poll_changes().await.unwrap();
        assert!(recovered.is_empty());
        assert_eq!(manager.recreations(), 1);
        assert_eq!(manager.handle(), Some(&FilterHandle("0x2".to_string())));

        let next = manager.poll_changes().await.unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(ledger.created(), 2);
        assert_eq!(manager.polls(), 2);
    }

    #[tokio::test]
    async fn test_transient_transport_errors_are_retried() {
        let ledger = Arc::new(ScriptedLedger::with_polls(vec![
            Err(EngineError::Transport("timeout".into())),
            Err(EngineError::Transport("timeout".into())),
            Ok(vec![make_log("0xa")]),
        ]));
        let mut manager = FilterManager::new(ledger, EventShape::token_transfers(), fast_retry(5));

        let logs = manager.poll_changes().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(manager.recreations(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_propagates() {
        let ledger = Arc::new(ScriptedLedger::with_polls(vec![
            Err(EngineError::Transport("down".into())),
            Err(EngineError::Transport("down".into())),
        ]));
        let mut manager = FilterManager::new(ledger, EventShape::token_transfers(), fast_retry(2));

        let err = manager.poll_changes().await.unwrap_err();
        assert!(matches!(err, EngineError::RetriesExhausted { attempts: 2, .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_release_uninstalls_once() {
        let ledger = Arc::new(ScriptedLedger::default());
        let mut manager =
            FilterManager::new(ledger.clone(), EventShape::token_transfers(), fast_retry(3));

        manager.ensure_filter().await.unwrap();
        manager.release().await;
        manager.release().await;

        assert_eq!(ledger.uninstalled.lock().unwrap().len(), 1);
        assert!(manager.handle().is_none());
    }

    #[tokio::test]
    async fn test_release_failure_is_not_fatal() {
        let ledger = Arc::new(ScriptedLedger {
            fail_uninstall: true,
            ..ScriptedLedger::default()
        });
        let mut manager = FilterManager::new(ledger, EventShape::token_transfers(), fast_retry(3));

        manager.ensure_filter().await.unwrap();
        manager.release().await;
        assert!(manager.handle().is_none());
    }
}
