//! Detects a conda cache corrupted mid-download by scanning a solver
//! subprocess's combined output for three independent textual signals.
//!
//! None of the three signals alone is conclusive — `pkgs` appears in
//! ordinary log lines, and `appears to be corrupted` is sometimes emitted
//! for a single, individually-retryable package. All three must latch
//! across the *entire* captured stream before the run is condemned, so the
//! scan never short-circuits on the first match.

/// Accumulates the three corruption signals across an arbitrary number of
/// [`CorruptionScanner::feed`] calls, so a caller can scan stdout and
/// stderr separately (or in chunks) and only ask [`CorruptionScanner::is_corrupted`]
/// once, at EOF.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CorruptionScanner {
    safety_error: bool,
    pkgs: bool,
    appears_corrupted: bool,
}

impl CorruptionScanner {
    /// Constructs a scanner with no signal latched yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds another chunk of subprocess output into the scanner. Matching
    /// is case-insensitive; a signal once latched stays latched regardless
    /// of what later chunks contain.
    pub fn feed(&mut self, chunk: &str) {
        let lower = chunk.to_ascii_lowercase();
        self.safety_error |= lower.contains("safetyerror:");
        self.pkgs |= lower.contains("pkgs");
        self.appears_corrupted |= lower.contains("appears to be corrupted");
    }

    /// Returns true iff every one of the three signals has latched. Meant
    /// to be called once, after the subprocess has exited and every chunk
    /// of its output has been fed in.
    pub fn is_corrupted(&self) -> bool {
        self.safety_error && self.pkgs && self.appears_corrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_all_three_signals() {
        let mut scanner = CorruptionScanner::new();
        scanner.feed("SafetyError: package pkgs/noarch/foo-1.0 appears to be corrupted");
        assert!(scanner.is_corrupted());
    }

    #[test]
    fn two_of_three_signals_do_not_condemn_the_run() {
        let mut scanner = CorruptionScanner::new();
        scanner.feed("Downloading pkgs/noarch/foo-1.0.tar.bz2");
        scanner.feed("SafetyError: hash mismatch");
        assert!(!scanner.is_corrupted());
    }

    #[test]
    fn signals_latch_across_separate_feed_calls() {
        let mut scanner = CorruptionScanner::new();
        scanner.feed("pulling pkgs index");
        scanner.feed("SAFETYERROR: mismatch");
        scanner.feed("the downloaded package appears to be corrupted");
        assert!(scanner.is_corrupted());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let mut scanner = CorruptionScanner::new();
        scanner.feed("SAFETYERROR: PKGS ENTRY APPEARS TO BE CORRUPTED");
        assert!(scanner.is_corrupted());
    }
}
