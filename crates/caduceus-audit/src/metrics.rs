//! Named-counter metrics emission.
//!
//! The core emits counters (`agent_error`, `compliance_violation`,
//! `workflow_execution`, `rag_query`, …) with tag maps. The sink's only
//! contract is "accept and timestamp" — aggregation lives outside the
//! platform.

use std::collections::HashMap;
use std::sync::Mutex;

/// A consumer of named counters with tag maps.
pub trait MetricsSink: Send + Sync {
    /// Increment `name` by one, tagged with `tags`.
    fn incr(&self, name: &str, tags: &[(&str, &str)]);
}

/// A sink that discards everything. Useful where metrics are not wired.
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn incr(&self, _name: &str, _tags: &[(&str, &str)]) {}
}

/// Reference in-memory sink keeping exact counts per (name, tags) series.
///
/// Series keys look like `agent_error{agent=imaging-1}` with tags in
/// sorted order, so the same logical series always lands on one key.
pub struct InMemoryMetrics {
    counts: Mutex<HashMap<String, u64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn series_key(name: &str, tags: &[(&str, &str)]) -> String {
        if tags.is_empty() {
            return name.to_string();
        }
        let mut sorted: Vec<_> = tags.to_vec();
        sorted.sort();
        let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{name}{{{}}}", rendered.join(","))
    }

    /// Current count for the exact (name, tags) series.
    pub fn count(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        let key = Self::series_key(name, tags);
        self.counts
            .lock()
            .map(|c| c.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Sum over every series sharing `name`, regardless of tags.
    pub fn total(&self, name: &str) -> u64 {
        self.counts
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|(k, _)| *k == name || k.starts_with(&format!("{name}{{")))
                    .map(|(_, v)| v)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Copy of all series and their counts.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr(&self, name: &str, tags: &[(&str, &str)]) {
        let key = Self::series_key(name, tags);
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
}
