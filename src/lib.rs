//! Launch-platform token monitor
//!
//! Watches every ERC-20 `Transfer` on an EVM chain, detects tokens created
//! through one launch platform, classifies their subsequent transfers and
//! keeps a risk-scored aggregate per token in SQLite.

pub mod classifier;
pub mod config;
pub mod db;
pub mod decoder;
pub mod detector;
pub mod engine;
pub mod errors;
pub mod filter_manager;
pub mod grouper;
pub mod ledger;
pub mod retry;
pub mod risk;
pub mod rpc;
pub mod runtime;
pub mod state;
pub mod types;

pub use config::EngineConfig;
pub use engine::MonitorEngine;
pub use errors::{EngineError, EngineResult};
