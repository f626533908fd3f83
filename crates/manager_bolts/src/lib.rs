//! Low-level bolts shared by the fuzzing manager: coverage sets with a
//! deterministic minimizer, kernel-crash classification, and content hashing
//! for the persistent corpus store.

pub mod cover;
pub mod crash;
pub mod hash;
pub mod stats;

pub use cover::Cover;
pub use crash::{find_crash, CrashSpan, Suppressions};
pub use hash::content_hash;
pub use stats::Stats;
