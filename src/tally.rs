//! Digest comparison and per-suite pass/fail accounting.

use std::fmt;

/// True when `computed` hex-encodes (lowercase) to exactly `expected_hex`.
pub fn compare(expected_hex: &str, computed: &[u8]) -> bool {
    hex::encode(computed) == expected_hex
}

/// Running counts for one suite. Only ever incremented, so the order in
/// which outcomes are recorded does not matter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    passed: usize,
    failed: usize,
    skipped: usize,
    disagreements: usize,
    timed_out: usize,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare and count. Returns whether the line passed.
    pub fn record(&mut self, expected_hex: &str, computed: &[u8]) -> bool {
        let matched = compare(expected_hex, computed);
        if matched {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        matched
    }

    /// A line that could not be scored (provider error and the like).
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Sync and async digests differed for the same input.
    pub fn record_disagreement(&mut self) {
        self.failed += 1;
        self.disagreements += 1;
    }

    pub fn record_timeout(&mut self) {
        self.failed += 1;
        self.timed_out += 1;
    }

    /// A malformed line: neither passed nor failed.
    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    /// Lines scored so far.
    pub fn scored(&self) -> usize {
        self.passed + self.failed
    }

    pub fn finish(self, name: &str) -> SuiteResult {
        SuiteResult {
            name: name.to_string(),
            passed: self.passed,
            failed: self.failed,
            total: self.passed + self.failed,
            skipped: self.skipped,
            disagreements: self.disagreements,
            timed_out: self.timed_out,
        }
    }
}

/// Final counts for a suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteResult {
    pub name: String,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub skipped: usize,
    /// Failures where the sync and async paths disagreed.
    pub disagreements: usize,
    /// Failures caused by a dispatch that never completed.
    pub timed_out: usize,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for SuiteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed > 0 {
            write!(f, "{}/{} tests failed on: {}", self.failed, self.total, self.name)
        } else {
            write!(f, "{} tests passed on: {}", self.passed, self.name)
        }
    }
}
