//! Boundaries the Manager depends on but never implements for real: the
//! program serialization format and the priority-matrix calculation for
//! call graphs (spec §1 lists both as out of scope). Each is a trait so a
//! real deployment can inject the actual syzkaller-compatible codec and
//! scorer; the implementations here are deliberately trivial stand-ins used
//! by tests and the local demo binary.

use crate::call_table::{CallId, CallTable};
use crate::corpus::CorpusEntry;

/// Decodes opaque program bytes into the ordered list of syscall names the
/// program invokes. Returns `Err` for anything the store's validator should
/// reject.
pub trait ProgramDeserializer: Send + Sync {
    fn decode(&self, prog: &[u8]) -> Result<Vec<String>, String>;
}

/// Produces the priority matrix between every pair of syscall ids from the
/// current corpus. Pure function of the corpus contents, recomputed on
/// every `Connect`.
pub trait PriorityModel: Send + Sync {
    fn compute(&self, corpus: &[CorpusEntry], calls: &CallTable) -> Vec<Vec<f32>>;
}

/// A program is one syscall name per line. Not a real encoding of syzkaller
/// programs, just enough structure for the call-enablement bookkeeping this
/// crate is actually responsible for.
#[derive(Debug, Default)]
pub struct LineProgramDeserializer;

impl ProgramDeserializer for LineProgramDeserializer {
    fn decode(&self, prog: &[u8]) -> Result<Vec<String>, String> {
        let text = std::str::from_utf8(prog).map_err(|e| e.to_string())?;
        let calls: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if calls.is_empty() {
            return Err("program has no calls".to_string());
        }
        Ok(calls)
    }
}

/// Every syscall pair gets equal weight. A real priority model would favor
/// pairs that co-occur in interesting programs; this one exists only so
/// `Connect` has something deterministic to return.
#[derive(Debug, Default)]
pub struct UniformPriorityModel;

impl PriorityModel for UniformPriorityModel {
    fn compute(&self, _corpus: &[CorpusEntry], calls: &CallTable) -> Vec<Vec<f32>> {
        let n = calls.len();
        vec![vec![1.0; n]; n]
    }
}
