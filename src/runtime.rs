//! Block loop and graceful shutdown

use crate::engine::{FlushReport, MonitorEngine};
use crate::errors::EngineResult;
use crate::types::BlockHeader;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub blocks_processed: u64,
    pub tokens_detected: usize,
    /// `None` when the final flush ran out of grace time
    pub final_flush: Option<FlushReport>,
}

/// Process blocks until `shutdown` resolves, the block stream ends, or a
/// fatal error occurs
///
/// A block in progress always completes before shutdown is observed. On exit
/// the receiver is closed, dirty records are flushed within `grace`, and the
/// event filter is released.
pub async fn run_until_shutdown<S>(
    engine: &mut MonitorEngine,
    mut blocks: mpsc::Receiver<BlockHeader>,
    shutdown: S,
    grace: Duration,
) -> EngineResult<RunSummary>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut summary = RunSummary::default();

    log::info!("🔄 Waiting for blocks...");
    let result = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                log::info!("⚠️  Shutdown requested");
                break Ok(());
            }
            next = blocks.recv() => match next {
                Some(header) => match engine.process_block(header).await {
                    Ok(outcome) => {
                        summary.blocks_processed += 1;
                        summary.tokens_detected += outcome.detected.len();
                    }
                    Err(e) if e.is_fatal() => {
                        log::error!("❌ Fatal error at block {}: {}", header.number, e);
                        break Err(e);
                    }
                    Err(e) => log::warn!("⚠️  Block {} skipped: {}", header.number, e),
                },
                None => {
                    log::warn!("⚠️  Block stream closed");
                    break Ok(());
                }
            }
        }
    };

    blocks.close();
    summary.final_flush = engine.shutdown(grace).await;

    result.map(|_| summary)
}
