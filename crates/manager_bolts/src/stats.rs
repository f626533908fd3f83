//! String-keyed monotonic counters, merged additively from fuzzer reports
//! and from the manager's own events (`vm restarts`, `crashes`, ...).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Stats(FxHashMap<String, u64>);

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, key: &str, by: u64) {
        *self.0.entry(key.to_string()).or_insert(0) += by;
    }

    /// Adds every counter in `delta` into `self`.
    pub fn merge(&mut self, delta: &FxHashMap<String, u64>) {
        for (key, value) in delta {
            self.incr(key, *value);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }
}
