//! Pure-function crash classification over a byte buffer.
//!
//! `find_crash` is deliberately dumb: it knows nothing about which VM the
//! buffer came from, just a fixed set of kernel-failure signatures. Callers
//! own everything time-related (settle windows, watchdogs); see
//! `manager_core::supervisor`.

use std::sync::OnceLock;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

/// One crash signature found in a buffer, as a byte range plus a short
/// human description (the matched line, trimmed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashSpan {
    pub description: String,
    pub start: usize,
    pub end: usize,
}

fn patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"kernel BUG at [^\n]*",
            r"BUG: [^\n]*",
            r"Kernel panic[^\n]*",
            r"Call Trace:",
            r"soft lockup[^\n]*",
            r"general protection fault[^\n]*",
            r"INFO: task [^\n]* blocked for more than [^\n]*",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static crash pattern must compile"))
        .collect()
    })
}

/// Scans `buf` for the earliest known kernel-failure signature.
#[must_use]
pub fn find_crash(buf: &[u8]) -> Option<CrashSpan> {
    let mut best: Option<(usize, usize, String)> = None;
    for re in patterns() {
        if let Some(m) = re.find(buf) {
            let is_earlier = match &best {
                Some((start, ..)) => m.start() < *start,
                None => true,
            };
            if is_earlier {
                let description = String::from_utf8_lossy(m.as_bytes()).trim().to_string();
                best = Some((m.start(), m.end(), description));
            }
        }
    }
    best.map(|(start, end, description)| CrashSpan {
        description,
        start,
        end,
    })
}

/// Ordered list of regexes that mark a crash-looking buffer as benign noise.
#[derive(Debug, Default)]
pub struct Suppressions(Vec<Regex>);

impl Suppressions {
    pub fn compile(patterns: &[String]) -> Result<Self, regex::Error> {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(compiled))
    }

    /// True if any suppression regex matches anywhere in `buf`.
    #[must_use]
    pub fn matches(&self, buf: &[u8]) -> bool {
        self.0.iter().any(|re| re.is_match(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_bug_signature() {
        let buf = b"executing program\nBUG: kernel NULL pointer dereference at 0x0\nmore output";
        let span = find_crash(buf).expect("crash should be found");
        assert!(span.description.starts_with("BUG: kernel NULL pointer"));
        assert_eq!(&buf[span.start..span.end], &span.description.as_bytes()[..]);
    }

    #[test]
    fn no_crash_in_clean_output() {
        assert!(find_crash(b"executing program\nall good\n").is_none());
    }

    #[test]
    fn picks_earliest_match_across_patterns() {
        let buf = b"Call Trace:\nBUG: later thing\n";
        let span = find_crash(buf).unwrap();
        assert_eq!(span.description, "Call Trace:");
    }

    #[test]
    fn suppression_filters_known_noise() {
        let supp = Suppressions::compile(&["qemu: terminating on signal".to_string()]).unwrap();
        assert!(supp.matches(b"qemu: terminating on signal 15 from pid 123"));
        assert!(!supp.matches(b"BUG: something else"));
    }

    #[test]
    fn crash_scan_overlap_catches_boundary_split_signature() {
        // A signature shorter than the 128-byte overlap must still be found
        // even if earlier chunks had already been scanned past that point.
        let whole = b"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxBUG: split across a chunk\n";
        let overlap_start = whole.len().saturating_sub(128).min(116);
        assert!(find_crash(&whole[overlap_start..]).is_some());
    }
}
