//! Engine configuration

mod config;

pub use config::{EngineConfig, LedgerPolicy};
