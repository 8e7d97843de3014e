//! Collection-run state
//!
//! Everything a run remembers between leaves lives here, keyed by run id:
//! the pending next-request directive, per-request execution counters, the
//! append-only ledger of executed leaves and the replay queue.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// One executed leaf; `order` is its depth-first position in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub request_id: String,
    pub name: String,
    pub order: usize,
}

impl LedgerEntry {
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.name == name_or_id || self.request_id == name_or_id
    }
}

/// Ledger entries waiting to be re-executed, first in first out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayQueue(VecDeque<LedgerEntry>);

impl ReplayQueue {
    /// Every ledger entry whose order is at least `from_order`, in ledger order
    pub fn from_ledger(ledger: &[LedgerEntry], from_order: usize) -> Self {
        Self(ledger.iter().filter(|e| e.order >= from_order).cloned().collect())
    }

    pub fn pop(&mut self) -> Option<LedgerEntry> {
        self.0.pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.0.iter()
    }
}

/// State of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionRunState {
    pub directive: Option<String>,
    pub counters: HashMap<String, u32>,
    pub ledger: Vec<LedgerEntry>,
    pub replay: ReplayQueue,
}

/// Persistent store for run state.
///
/// State for a run id comes into existence on its first write and stays
/// until [`RunStateStore::purge`] is called.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    async fn directive(&self, run_id: &str) -> Result<Option<String>>;
    async fn set_directive(&self, run_id: &str, directive: &str) -> Result<()>;
    /// Remove and return the pending directive
    async fn clear_directive(&self, run_id: &str) -> Result<Option<String>>;

    async fn execution_count(&self, run_id: &str, request_id: &str) -> Result<u32>;
    /// Increment and return the new count
    async fn increment_execution(&self, run_id: &str, request_id: &str) -> Result<u32>;

    /// Append unless the request is already ledgered; returns whether it was added
    async fn append_ledger(&self, run_id: &str, entry: LedgerEntry) -> Result<bool>;
    async fn ledger(&self, run_id: &str) -> Result<Vec<LedgerEntry>>;

    async fn find_ledger_entry(&self, run_id: &str, name_or_id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.ledger(run_id).await?.into_iter().find(|e| e.matches(name_or_id)))
    }

    /// Replace the replay queue with the ledger slice starting at `from_order`
    async fn rebuild_replay_queue(&self, run_id: &str, from_order: usize) -> Result<usize>;
    async fn pop_replay(&self, run_id: &str) -> Result<Option<LedgerEntry>>;

    async fn snapshot(&self, run_id: &str) -> Result<Option<CollectionRunState>>;
    async fn purge(&self, run_id: &str) -> Result<()>;
}

/// Run state kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryRunStateStore {
    runs: DashMap<String, CollectionRunState>,
}

impl InMemoryRunStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[async_trait]
impl RunStateStore for InMemoryRunStateStore {
    async fn directive(&self, run_id: &str) -> Result<Option<String>> {
        Ok(self.runs.get(run_id).and_then(|s| s.directive.clone()))
    }

    async fn set_directive(&self, run_id: &str, directive: &str) -> Result<()> {
        self.runs.entry(run_id.to_string()).or_default().directive = Some(directive.to_string());
        Ok(())
    }

    async fn clear_directive(&self, run_id: &str) -> Result<Option<String>> {
        Ok(self.runs.get_mut(run_id).and_then(|mut s| s.directive.take()))
    }

    async fn execution_count(&self, run_id: &str, request_id: &str) -> Result<u32> {
        Ok(self
            .runs
            .get(run_id)
            .and_then(|s| s.counters.get(request_id).copied())
            .unwrap_or(0))
    }

    async fn increment_execution(&self, run_id: &str, request_id: &str) -> Result<u32> {
        let mut state = self.runs.entry(run_id.to_string()).or_default();
        let count = state.counters.entry(request_id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn append_ledger(&self, run_id: &str, entry: LedgerEntry) -> Result<bool> {
        let mut state = self.runs.entry(run_id.to_string()).or_default();
        if state.ledger.iter().any(|e| e.request_id == entry.request_id) {
            return Ok(false);
        }
        state.ledger.push(entry);
        Ok(true)
    }

    async fn ledger(&self, run_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self.runs.get(run_id).map(|s| s.ledger.clone()).unwrap_or_default())
    }

    async fn rebuild_replay_queue(&self, run_id: &str, from_order: usize) -> Result<usize> {
        let mut state = self.runs.entry(run_id.to_string()).or_default();
        state.replay = ReplayQueue::from_ledger(&state.ledger, from_order);
        Ok(state.replay.len())
    }

    async fn pop_replay(&self, run_id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.runs.get_mut(run_id).and_then(|mut s| s.replay.pop()))
    }

    async fn snapshot(&self, run_id: &str) -> Result<Option<CollectionRunState>> {
        Ok(self.runs.get(run_id).map(|s| s.clone()))
    }

    async fn purge(&self, run_id: &str) -> Result<()> {
        self.runs.remove(run_id);
        Ok(())
    }
}
