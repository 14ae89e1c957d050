//! Build progress reporting.
//!
//! Mirrors the index-returning start/complete callback shape of
//! `rattler_cache`'s package cache reporter: each stage hands back an opaque
//! index from its `*_start` call, which is threaded back into the matching
//! `*_complete` call. This lets a reporter track overlapping or re-ordered
//! stages (a retried build reports two solve stages) without needing its
//! own stack.

/// One stage of the build pipeline, in the order a single attempt runs
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Resolving and fetching packages into the staged target.
    Solve,
    /// Running the pip-style installer for the `pip:` requirements.
    Pip,
    /// Running the descriptor's post-install command lines.
    PostInstall {
        /// Index into the descriptor's post-install command list.
        index: usize,
    },
    /// Capturing the activation environment.
    Activate,
    /// Promoting the staged tree into the library, catalog, and template
    /// store.
    Promote,
}

/// Receives progress notifications from [`crate::Builder::build`]. The
/// default [`NoopReporter`] discards every call; a caller that wants
/// progress output (a CLI spinner, a log line per stage) implements this
/// trait instead.
pub trait BuildReporter: Send + Sync {
    /// Called when a stage begins. The returned index is passed back to
    /// the matching [`BuildReporter::on_stage_complete`] call.
    fn on_stage_start(&self, stage: BuildStage) -> usize {
        let _ = stage;
        0
    }

    /// Called when a stage finishes successfully, with the index returned
    /// by its `on_stage_start` call.
    fn on_stage_complete(&self, index: usize) {
        let _ = index;
    }

    /// Called once, only if a second attempt is about to start after the
    /// first attempt failed non-fatally.
    fn on_retry(&self, reason: &str) {
        let _ = reason;
    }
}

/// A [`BuildReporter`] that does nothing, used when the caller does not
/// need build progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl BuildReporter for NoopReporter {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingReporter {
        starts: AtomicUsize,
        completes: AtomicUsize,
    }

    impl BuildReporter for CountingReporter {
        fn on_stage_start(&self, _stage: BuildStage) -> usize {
            self.starts.fetch_add(1, Ordering::SeqCst)
        }

        fn on_stage_complete(&self, _index: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_reporter_accepts_every_call() {
        let reporter = NoopReporter;
        let index = reporter.on_stage_start(BuildStage::Solve);
        reporter.on_stage_complete(index);
        reporter.on_retry("forced debug retry");
    }

    #[test]
    fn counting_reporter_threads_indices_back() {
        let reporter = CountingReporter::default();
        let a = reporter.on_stage_start(BuildStage::Solve);
        let b = reporter.on_stage_start(BuildStage::Pip);
        reporter.on_stage_complete(a);
        reporter.on_stage_complete(b);
        assert_eq!(reporter.starts.load(Ordering::SeqCst), 2);
        assert_eq!(reporter.completes.load(Ordering::SeqCst), 2);
    }
}
