//! The Corpus Engine: authoritative in-memory state (candidates, corpus,
//! per-call cumulative cover, priorities, stats, fuzzer sessions) guarded by
//! a single mutex, mirrored to disk through a `PersistentStore`.

use std::sync::{Arc, Mutex};

use manager_bolts::{Cover, Stats};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::call_table::{CallId, CallTable};
use crate::error::CoreError;
use crate::external::{PriorityModel, ProgramDeserializer};
use crate::store::PersistentStore;

/// One program a fuzzer submitted, as it crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RpcInput {
    pub call: String,
    pub prog: Vec<u8>,
    pub cover: Cover,
}

/// A corpus entry: an `RpcInput` plus the call id it was accepted under.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub call_id: CallId,
    pub call_name: String,
    pub prog: Vec<u8>,
    pub cover: Cover,
}

impl CorpusEntry {
    #[must_use]
    pub fn as_rpc_input(&self) -> RpcInput {
        RpcInput {
            call: self.call_name.clone(),
            prog: self.prog.clone(),
            cover: self.cover.clone(),
        }
    }
}

struct CorpusState {
    candidates: Vec<Vec<u8>>,
    corpus: Vec<CorpusEntry>,
    corpus_cover: FxHashMap<CallId, Cover>,
    prios: Vec<Vec<f32>>,
    stats: Stats,
    fuzzers: FxHashMap<String, usize>,
    disabled_hashes: FxHashSet<String>,
    store: PersistentStore,
}

/// Guards every mutable field the spec calls out as shared: `candidates`,
/// `corpus`, `corpusCover`, `prios`, `stats`, `fuzzers`, `persistentCorpus`,
/// `disabledHashes`. Every method below is one RPC handler's worth of work
/// and locks for its whole duration, the "single coarse lock" the spec
/// calls for, without ever holding the lock across an `.await`.
pub struct CorpusEngine {
    state: Mutex<CorpusState>,
    calls: CallTable,
    cover_enabled: bool,
    deserializer: Arc<dyn ProgramDeserializer>,
    priority_model: Arc<dyn PriorityModel>,
}

impl CorpusEngine {
    pub fn new(
        store: PersistentStore,
        calls: CallTable,
        cover_enabled: bool,
        deserializer: Arc<dyn ProgramDeserializer>,
        priority_model: Arc<dyn PriorityModel>,
    ) -> Self {
        Self {
            state: Mutex::new(CorpusState {
                candidates: Vec::new(),
                corpus: Vec::new(),
                corpus_cover: FxHashMap::default(),
                prios: Vec::new(),
                stats: Stats::new(),
                fuzzers: FxHashMap::default(),
                disabled_hashes: FxHashSet::default(),
                store,
            }),
            calls,
            cover_enabled,
            deserializer,
            priority_model,
        }
    }

    #[must_use]
    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    /// Loads persisted programs as candidates, or marks their hash disabled
    /// if any call they make is currently disabled. Programs the store's
    /// validator already rejected never reach this method.
    pub fn startup_load(&self, persisted: Vec<(String, Vec<u8>)>) {
        let mut state = self.state.lock().unwrap();
        for (digest, bytes) in persisted {
            let Ok(call_names) = self.deserializer.decode(&bytes) else {
                // The store's validator already filtered these out; treat
                // a late failure the same way, conservatively.
                continue;
            };
            let references_disabled_call = call_names.iter().any(|name| {
                self.calls
                    .id(name)
                    .is_none_or(|id| !self.calls.is_enabled(id))
            });
            if references_disabled_call {
                state.disabled_hashes.insert(digest);
            } else {
                state.candidates.push(bytes);
            }
        }
    }

    /// Accepts `input` into the corpus iff its cover contributes at least
    /// one edge the per-call cumulative cover hasn't already seen. Returns
    /// whether it was accepted.
    pub fn accept_input(&self, input: RpcInput) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(call_id) = self.calls.id(&input.call) else {
            return false;
        };
        let already_covered = state
            .corpus_cover
            .get(&call_id)
            .cloned()
            .unwrap_or_default();
        if input.cover.difference(&already_covered).is_empty() {
            return false;
        }

        state
            .corpus_cover
            .entry(call_id)
            .or_default()
            .union_with(&input.cover);

        if let Err(e) = state.store.add(&input.prog) {
            log::warn!("corpus engine: failed to persist accepted input: {e}");
        }
        state.corpus.push(CorpusEntry {
            call_id,
            call_name: input.call,
            prog: input.prog,
            cover: input.cover,
        });
        state.stats.incr("manager new inputs", 1);
        true
    }

    /// Buckets the corpus by call, union-minimizes each bucket's cover,
    /// recomputes priorities, and, once every persisted candidate has been
    /// re-triaged, shrinks the persistent store to match.
    pub fn minimize(&self) {
        let mut state = self.state.lock().unwrap();

        if self.cover_enabled && !state.corpus.is_empty() {
            let mut buckets: FxHashMap<CallId, Vec<usize>> = FxHashMap::default();
            for (idx, entry) in state.corpus.iter().enumerate() {
                buckets.entry(entry.call_id).or_default().push(idx);
            }

            let mut keep_indices: Vec<usize> = Vec::new();
            for indices in buckets.values() {
                let covers: Vec<&Cover> = indices.iter().map(|&i| &state.corpus[i].cover).collect();
                for picked in manager_bolts::cover::minimize(&covers) {
                    keep_indices.push(indices[picked]);
                }
            }
            keep_indices.sort_unstable();
            state.corpus = keep_indices
                .into_iter()
                .map(|i| state.corpus[i].clone())
                .collect();
        }

        state.prios = self.priority_model.compute(&state.corpus, &self.calls);

        if state.candidates.is_empty() {
            let mut keep: FxHashSet<String> = state
                .corpus
                .iter()
                .map(|e| manager_bolts::content_hash(&e.prog))
                .collect();
            keep.extend(state.disabled_hashes.iter().cloned());
            state.store.minimize(&keep);
        }
    }

    /// Increments `vm restarts`, re-minimizes, registers the fuzzer with a
    /// fresh cursor, and returns the current priority matrix and the
    /// comma-separated enabled syscall ids.
    pub fn connect(&self, name: &str) -> (Vec<Vec<f32>>, String) {
        {
            let mut state = self.state.lock().unwrap();
            state.stats.incr("vm restarts", 1);
        }
        self.minimize();

        let mut state = self.state.lock().unwrap();
        state.fuzzers.insert(name.to_string(), 0);
        (state.prios.clone(), self.calls.enabled_csv())
    }

    /// Merges `stats_delta`, advances `name`'s cursor by up to 100 corpus
    /// entries, and pops up to 10 candidates off the stack. An unknown
    /// fuzzer name is a programmer-invariant violation per the spec's error
    /// taxonomy: `CoreError::UnknownFuzzer` is fatal, and callers must not
    /// turn it into a normal error response.
    pub fn fuzzer_poll(
        &self,
        name: &str,
        stats_delta: &FxHashMap<String, u64>,
    ) -> Result<(Vec<RpcInput>, Vec<Vec<u8>>), CoreError> {
        let mut state = self.state.lock().unwrap();
        state.stats.merge(stats_delta);

        let cursor = *state
            .fuzzers
            .get(name)
            .ok_or_else(|| CoreError::UnknownFuzzer(name.to_string()))?;

        let end = (cursor + 100).min(state.corpus.len());
        let new_inputs: Vec<RpcInput> = state.corpus[cursor..end]
            .iter()
            .map(CorpusEntry::as_rpc_input)
            .collect();
        *state.fuzzers.get_mut(name).unwrap() = end;

        let mut candidates_batch = Vec::new();
        for _ in 0..10 {
            match state.candidates.pop() {
                Some(candidate) => candidates_batch.push(candidate),
                None => break,
            }
        }

        Ok((new_inputs, candidates_batch))
    }

    pub fn record_stat(&self, key: &str, by: u64) {
        self.state.lock().unwrap().stats.incr(key, by);
    }

    #[must_use]
    pub fn stats_snapshot(&self) -> Stats {
        self.state.lock().unwrap().stats.clone()
    }

    #[must_use]
    pub fn corpus_len(&self) -> usize {
        self.state.lock().unwrap().corpus.len()
    }

    #[must_use]
    pub fn candidates_len(&self) -> usize {
        self.state.lock().unwrap().candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{LineProgramDeserializer, UniformPriorityModel};
    use tempfile::tempdir;

    fn engine_with_calls(calls: &[&str]) -> (CorpusEngine, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let (store, _) = PersistentStore::open(dir.path(), |_| true).unwrap();
        let all: Vec<String> = calls.iter().map(|s| s.to_string()).collect();
        let enabled: FxHashSet<String> = all.iter().cloned().collect();
        let table = CallTable::new(&all, &enabled);
        let engine = CorpusEngine::new(
            store,
            table,
            true,
            Arc::new(LineProgramDeserializer),
            Arc::new(UniformPriorityModel),
        );
        (engine, dir)
    }

    #[test]
    fn accept_first_input() {
        let (engine, _dir) = engine_with_calls(&["read"]);
        let accepted = engine.accept_input(RpcInput {
            call: "read".to_string(),
            prog: b"read".to_vec(),
            cover: [1, 2, 3].into_iter().collect(),
        });
        assert!(accepted);
        assert_eq!(engine.corpus_len(), 1);
        assert_eq!(engine.stats_snapshot().get("manager new inputs"), 1);
    }

    #[test]
    fn reject_subsumed_input() {
        let (engine, _dir) = engine_with_calls(&["read"]);
        engine.accept_input(RpcInput {
            call: "read".to_string(),
            prog: b"read".to_vec(),
            cover: [1, 2, 3].into_iter().collect(),
        });
        let accepted = engine.accept_input(RpcInput {
            call: "read".to_string(),
            prog: b"read2".to_vec(),
            cover: [1, 2].into_iter().collect(),
        });
        assert!(!accepted);
        assert_eq!(engine.corpus_len(), 1);
    }

    #[test]
    fn poll_fan_out_then_drains_to_empty() {
        let (engine, _dir) = engine_with_calls(&["read"]);
        engine.accept_input(RpcInput {
            call: "read".to_string(),
            prog: b"read".to_vec(),
            cover: [1, 2, 3].into_iter().collect(),
        });
        engine.connect("f2");
        let (new_inputs, _candidates) = engine.fuzzer_poll("f2", &FxHashMap::default()).unwrap();
        assert_eq!(new_inputs.len(), 1);
        let (new_inputs_again, _) = engine.fuzzer_poll("f2", &FxHashMap::default()).unwrap();
        assert!(new_inputs_again.is_empty());
    }

    #[test]
    fn poll_from_unknown_fuzzer_is_an_error() {
        let (engine, _dir) = engine_with_calls(&["read"]);
        let err = engine.fuzzer_poll("ghost", &FxHashMap::default()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownFuzzer(name) if name == "ghost"));
    }

    #[test]
    fn idempotent_connect_only_touches_restarts_and_prios() {
        let (engine, _dir) = engine_with_calls(&["read"]);
        engine.accept_input(RpcInput {
            call: "read".to_string(),
            prog: b"read".to_vec(),
            cover: [1].into_iter().collect(),
        });
        engine.connect("f1");
        let corpus_len_after_first = engine.corpus_len();
        engine.connect("f1");
        assert_eq!(engine.corpus_len(), corpus_len_after_first);
        assert_eq!(engine.stats_snapshot().get("vm restarts"), 2);
    }

    #[test]
    fn startup_load_splits_candidates_and_disabled_hashes() {
        let (engine, _dir) = engine_with_calls(&["read"]);
        engine.startup_load(vec![
            ("hash-enabled".to_string(), b"read".to_vec()),
            ("hash-disabled".to_string(), b"write".to_vec()),
        ]);
        assert_eq!(engine.candidates_len(), 1);
    }
}
