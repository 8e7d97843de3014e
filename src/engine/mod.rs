//! Request execution and collection runs

pub mod run;
pub mod state;
pub mod step;

pub use run::{CollectionRunner, NodeStatus, RunOptions, RunReport, StepEvent, StepListener, StepRecord};
pub use state::{CollectionRunState, InMemoryRunStateStore, LedgerEntry, ReplayQueue, RunStateStore};
pub use step::{Engine, EngineBuilder, StepExecutor};
