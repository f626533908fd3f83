//! Coverage sample: an unordered set of 64-bit edge identifiers.
//!
//! `rustc_hash` is used instead of a cryptographic hasher for the same reason
//! `healer` (a Rust kernel fuzzer in the same lineage) gives for its own
//! hash maps: "for quick hashmap and hashset, secure cryptographic hash is
//! unnecessary here". Edge sets are purely an in-process bookkeeping
//! structure; only the persistent store's filenames need a real digest.

use std::iter::FromIterator;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// A finite set of edge/PC identifiers executed during one program run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cover(FxHashSet<u64>);

impl Cover {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, pc: u64) -> bool {
        self.0.insert(pc)
    }

    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.0.iter()
    }

    /// Returns a new cover holding the union of `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Cover) -> Cover {
        Cover(self.0.union(&other.0).copied().collect())
    }

    pub fn union_with(&mut self, other: &Cover) {
        for &pc in &other.0 {
            self.0.insert(pc);
        }
    }

    /// Returns the elements present in `self` but absent from `other`.
    #[must_use]
    pub fn difference(&self, other: &Cover) -> Cover {
        Cover(self.0.difference(&other.0).copied().collect())
    }
}

impl FromIterator<u64> for Cover {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        Cover(iter.into_iter().collect())
    }
}

/// Returns the indices of a subset of `covers` whose union equals the union
/// of the whole list. Greedy largest-marginal-coverage-first; ties are
/// broken by ascending input index, so equal inputs always produce an equal
/// output list.
#[must_use]
pub fn minimize(covers: &[&Cover]) -> Vec<usize> {
    let total = covers
        .iter()
        .fold(Cover::new(), |acc, c| acc.union(c));
    if total.is_empty() {
        return Vec::new();
    }

    let mut covered = Cover::new();
    let mut remaining: Vec<usize> = (0..covers.len()).collect();
    let mut selected = Vec::new();

    while covered != total {
        let mut best_idx = None;
        let mut best_gain = 0usize;
        for &idx in &remaining {
            let gain = covers[idx].difference(&covered).len();
            if gain > best_gain {
                best_gain = gain;
                best_idx = Some(idx);
            }
        }
        let Some(idx) = best_idx else {
            // No remaining cover contributes anything new.
            break;
        };
        covered.union_with(covers[idx]);
        selected.push(idx);
        remaining.retain(|&x| x != idx);
    }

    selected.sort_unstable();
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cover(items: &[u64]) -> Cover {
        items.iter().copied().collect()
    }

    #[test]
    fn union_and_difference() {
        let a = cover(&[1, 2, 3]);
        let b = cover(&[2, 3, 4]);
        assert_eq!(a.union(&b), cover(&[1, 2, 3, 4]));
        assert_eq!(a.difference(&b), cover(&[1]));
        assert_eq!(b.difference(&a), cover(&[4]));
    }

    #[test]
    fn minimize_drops_fully_subsumed_entries() {
        let a = cover(&[1, 2, 3]);
        let b = cover(&[1, 2]);
        let c = cover(&[4]);
        let picked = minimize(&[&a, &b, &c]);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn minimize_is_deterministic_on_ties() {
        let a = cover(&[1, 2]);
        let b = cover(&[3, 4]);
        // Equal marginal gain every round; index order must decide.
        assert_eq!(minimize(&[&a, &b]), vec![0, 1]);
        assert_eq!(minimize(&[&b, &a]), vec![0, 1]);
    }

    #[test]
    fn minimize_empty_input() {
        let picked: Vec<usize> = minimize(&[]);
        assert!(picked.is_empty());
    }
}
