//! Byte metrics
//!
//! Request and response sizes are counted per project, transport
//! (`REST`, `GRAPHQL`) and direction. Each sample is also emitted as a
//! `tracing` event on the `reqflow::metrics` target.

use std::fmt;

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Response => f.write_str("response"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricKey {
    pub project: String,
    pub transport: &'static str,
    pub direction: Direction,
}

/// Totals for one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ByteCounter {
    pub count: u64,
    pub bytes: u64,
    pub max: u64,
}

#[derive(Debug, Default)]
pub struct ByteMetrics {
    counters: DashMap<MetricKey, ByteCounter>,
}

impl ByteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, project: &str, transport: &'static str, direction: Direction, bytes: u64) {
        info!(
            target: "reqflow::metrics",
            project,
            transport,
            direction = %direction,
            bytes,
            "byte size"
        );
        let key = MetricKey {
            project: project.to_string(),
            transport,
            direction,
        };
        let mut counter = self.counters.entry(key).or_default();
        counter.count += 1;
        counter.bytes += bytes;
        counter.max = counter.max.max(bytes);
    }

    pub fn get(&self, project: &str, transport: &'static str, direction: Direction) -> ByteCounter {
        let key = MetricKey {
            project: project.to_string(),
            transport,
            direction,
        };
        self.counters.get(&key).map(|c| *c).unwrap_or_default()
    }

    /// Sorted copy of every counter
    pub fn snapshot(&self) -> Vec<(MetricKey, ByteCounter)> {
        let mut out: Vec<_> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
