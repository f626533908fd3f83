use rustc_hash::{FxHashMap, FxHashSet};

/// A syscall identifier. The Manager never decodes call arguments; it only
/// ever needs the id to index per-call cumulative coverage and to report
/// which ids are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u32);

/// Bidirectional syscall name/id mapping plus the enabled subset. Built once
/// at startup from the config's resolved syscall list (parsing the syscall
/// description language itself is out of scope, see spec §1).
#[derive(Debug, Clone)]
pub struct CallTable {
    ids: FxHashMap<String, CallId>,
    names: Vec<String>,
    enabled: FxHashSet<CallId>,
}

impl CallTable {
    #[must_use]
    pub fn new(all_calls: &[String], enabled_calls: &FxHashSet<String>) -> Self {
        let mut ids = FxHashMap::default();
        let mut names = Vec::with_capacity(all_calls.len());
        let mut enabled = FxHashSet::default();
        for name in all_calls {
            let id = CallId(u32::try_from(names.len()).expect("syscall table larger than u32"));
            names.push(name.clone());
            ids.insert(name.clone(), id);
            if enabled_calls.contains(name) {
                enabled.insert(id);
            }
        }
        Self { ids, names, enabled }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn id(&self, name: &str) -> Option<CallId> {
        self.ids.get(name).copied()
    }

    #[must_use]
    pub fn name(&self, id: CallId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    #[must_use]
    pub fn is_enabled(&self, id: CallId) -> bool {
        self.enabled.contains(&id)
    }

    /// Comma-separated enabled syscall ids, in ascending order: the
    /// `EnabledCalls` field of a `Connect` response.
    #[must_use]
    pub fn enabled_csv(&self) -> String {
        let mut ids: Vec<u32> = self.enabled.iter().map(|c| c.0).collect();
        ids.sort_unstable();
        ids.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}
