//! Per-block orchestration
//!
//! poll -> group -> decode -> detect (enrich concurrently) -> classify ->
//! re-score -> flush. One block is processed to completion before the next;
//! a failure inside one transaction never aborts the block.

use crate::classifier::{StaticExchangeList, TradeClassifier};
use crate::config::EngineConfig;
use crate::db::TokenStore;
use crate::decoder::{decode_group, DecodedTransaction};
use crate::detector::{CreationCandidate, Enrichment, TokenCreationDetector};
use crate::errors::EngineResult;
use crate::filter_manager::FilterManager;
use crate::grouper::group_by_transaction;
use crate::ledger::{EventShape, LedgerFacade};
use crate::risk::{analyze, RiskThresholds};
use crate::state::TokenStateStore;
use crate::types::{Address, BlockHeader, LogEvent, TrackedToken};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What one block (or one log batch) did to the tracked set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    pub block_number: u64,
    pub logs: usize,
    pub transactions: usize,
    pub malformed: usize,
    pub detected: Vec<Address>,
    pub buys: usize,
    pub sells: usize,
    pub cross_platform: usize,
    pub wallet_transfers: usize,
    pub rejected: usize,
    pub touched: BTreeSet<Address>,
    pub persisted: usize,
    pub persist_failures: usize,
}

impl BlockOutcome {
    pub fn classified(&self) -> usize {
        self.buys + self.sells + self.cross_platform + self.wallet_transfers
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub persisted: usize,
    pub failed: usize,
}

pub struct MonitorEngine {
    store: TokenStateStore,
    filters: FilterManager,
    detector: TokenCreationDetector,
    classifier: TradeClassifier,
    ledger: Arc<dyn LedgerFacade>,
    persistence: Arc<dyn TokenStore>,
    risk: RiskThresholds,
    enrichment_concurrency: usize,
}

impl MonitorEngine {
    pub fn new(
        config: &EngineConfig,
        ledger: Arc<dyn LedgerFacade>,
        persistence: Arc<dyn TokenStore>,
    ) -> Self {
        let detector = TokenCreationDetector::new(
            config.platform.clone(),
            config.excluded_contracts.clone(),
            config.creator_strategy,
        );
        let classifier = TradeClassifier::new(
            config.platform.clone(),
            config.platform_infrastructure.clone(),
            config.settlement_asset.clone(),
            Box::new(StaticExchangeList::new(config.exchange_addresses.clone())),
            config.risk.wallet_transfer_limit,
        );

        Self {
            store: TokenStateStore::new(),
            filters: FilterManager::new(
                ledger.clone(),
                EventShape::token_transfers(),
                config.retry.clone(),
            ),
            detector,
            classifier,
            ledger,
            persistence,
            risk: config.risk.clone(),
            enrichment_concurrency: config.enrichment_concurrency.max(1),
        }
    }

    /// Load persisted tokens into the state store
    pub async fn hydrate(&mut self) -> EngineResult<usize> {
        let tokens = self.persistence.fetch_all().await?;
        let added = self.store.hydrate(tokens);
        log::info!("📂 Hydrated {} tracked tokens from persistence", added);
        Ok(added)
    }

    /// Install the event filter ahead of the first block
    pub async fn start(&mut self) -> EngineResult<()> {
        self.filters.ensure_filter().await.map(|_| ())
    }

    pub async fn process_block(&mut self, header: BlockHeader) -> EngineResult<BlockOutcome> {
        let started = Instant::now();
        let logs = self.filters.poll_changes().await?;

        let mut outcome = self.process_logs(logs, header).await;
        let flush = self.flush_dirty().await;
        outcome.persisted = flush.persisted;
        outcome.persist_failures = flush.failed;

        if outcome.detected.is_empty() && outcome.classified() == 0 {
            log::debug!("Block {}: {} logs, nothing tracked", header.number, outcome.logs);
        } else {
            log::info!(
                "📊 Block {}: {} logs | {} new tokens | {} buys, {} sells, {} exits, {} wallet | {} persisted | {}ms",
                header.number,
                outcome.logs,
                outcome.detected.len(),
                outcome.buys,
                outcome.sells,
                outcome.cross_platform,
                outcome.wallet_transfers,
                outcome.persisted,
                started.elapsed().as_millis()
            );
        }

        Ok(outcome)
    }

    /// Group, decode, detect, classify and re-score one batch of logs
    pub async fn process_logs(&mut self, logs: Vec<LogEvent>, header: BlockHeader) -> BlockOutcome {
        let mut outcome = BlockOutcome {
            block_number: header.number,
            logs: logs.len(),
            ..BlockOutcome::default()
        };

        let decoded: Vec<DecodedTransaction> = group_by_transaction(logs)
            .iter()
            .map(decode_group)
            .collect();
        outcome.transactions = decoded.len();
        outcome.malformed = decoded.iter().map(|tx| tx.skipped).sum();

        for token in self.detect(&decoded, header.timestamp).await {
            let address = token.address.clone();
            if !self.store.insert_new(token) {
                continue;
            }
            if let Some(token) = self.store.get(&address) {
                log::info!(
                    "🆕 New token {} ({}) by {} in tx {}",
                    address,
                    token.symbol.as_deref().unwrap_or("?"),
                    token.creator,
                    token.creation_tx
                );
            }
            outcome.touched.insert(address.clone());
            outcome.detected.push(address);
        }

        for tx in &decoded {
            let summary = self
                .classifier
                .classify_transaction(tx, &mut self.store, header.timestamp);
            outcome.buys += summary.buys;
            outcome.sells += summary.sells;
            outcome.cross_platform += summary.cross_platform;
            outcome.wallet_transfers += summary.wallet_transfers;
            outcome.rejected += summary.rejected;
            outcome.touched.extend(summary.touched);
        }

        self.rescore(&outcome.touched);
        outcome
    }

    async fn detect(&self, decoded: &[DecodedTransaction], timestamp: i64) -> Vec<TrackedToken> {
        let mut seen: HashSet<Address> = HashSet::new();
        let candidates: Vec<CreationCandidate> = decoded
            .iter()
            .flat_map(|tx| self.detector.find_candidates(tx, &self.store, timestamp))
            .filter(|candidate| seen.insert(candidate.contract.clone()))
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let detector = &self.detector;
        let ledger = self.ledger.as_ref();
        let mut enriched: Vec<(usize, CreationCandidate, Enrichment)> =
            stream::iter(candidates.into_iter().enumerate())
                .map(|(position, candidate)| async move {
                    let enrichment = detector.enrich(ledger, &candidate).await;
                    (position, candidate, enrichment)
                })
                .buffer_unordered(self.enrichment_concurrency)
                .collect()
                .await;
        enriched.sort_by_key(|(position, _, _)| *position);

        enriched
            .into_iter()
            .filter_map(|(_, candidate, enrichment)| {
                if !enrichment.data_errors.is_empty() {
                    log::debug!(
                        "Enrichment of {} degraded: {}",
                        candidate.contract,
                        enrichment.data_errors.join("; ")
                    );
                }
                detector.finalize(candidate, enrichment)
            })
            .collect()
    }

    fn rescore(&mut self, touched: &BTreeSet<Address>) {
        for address in touched {
            let Some(token) = self.store.get_mut(address) else {
                continue;
            };
            let assessment = analyze(token, &self.risk);
            if assessment.risk_level > token.risk.risk_level {
                log::warn!(
                    "🚨 {} risk {} -> {} (score {}): {:?}",
                    address,
                    token.risk.risk_level.as_str(),
                    assessment.risk_level.as_str(),
                    assessment.risk_score,
                    assessment.flags
                );
            }
            token.risk = assessment;
        }
    }

    /// Write every dirty token through to persistence
    ///
    /// A failed write is logged and dropped; the in-memory record stays
    /// authoritative and is written again the next time it changes.
    pub async fn flush_dirty(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        for token in self.store.take_dirty() {
            match self.persistence.upsert(&token).await {
                Ok(()) => report.persisted += 1,
                Err(e) => {
                    report.failed += 1;
                    log::error!("❌ Failed to persist {}: {}", token.address, e);
                }
            }
        }
        report
    }

    /// Final flush bounded by `grace`, then release the filter
    pub async fn shutdown(&mut self, grace: Duration) -> Option<FlushReport> {
        log::info!("🔄 Performing final flush...");
        let report = match tokio::time::timeout(grace, self.flush_dirty()).await {
            Ok(report) => {
                log::info!(
                    "✅ Final flush complete: {} persisted, {} failed",
                    report.persisted,
                    report.failed
                );
                Some(report)
            }
            Err(_) => {
                log::warn!("⚠️  Final flush exceeded {}ms grace period", grace.as_millis());
                None
            }
        };

        self.filters.release().await;
        report
    }

    pub fn store(&self) -> &TokenStateStore {
        &self.store
    }

    pub fn filters(&self) -> &FilterManager {
        &self.filters
    }
}
