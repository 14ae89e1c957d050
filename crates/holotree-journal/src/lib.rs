#![deny(missing_docs)]

//! The stats journal: an append-only newline-delimited-JSON log of
//! environment operations (`journals/stats.log`), read back by diagnostics
//! to produce per-outcome counts and time-windowed statistics.
//!
//! Writers hold no lock beyond the append itself — `OpenOptions::append`
//! gives atomic-enough semantics for single json-line writes on every
//! platform this cache targets — and readers tolerate a truncated final
//! line left behind by a writer that crashed mid-append, per the data
//! model's "readers tolerate partial last lines" note.

use fs_err as fs;
use holotree_hash::Blueprint;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Errors surfaced by the stats journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// An I/O error occurred on a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the failing operation acted on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl JournalError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JournalError::Io { path: path.into(), source }
    }
}

/// What kind of operation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A materialize call restored (or re-used) a space.
    SpaceUsed,
    /// A build pipeline ran for a blueprint.
    Build,
    /// A garbage-collect sweep ran over the library.
    Sweep,
}

/// The tagged outcome of a materialize (or build) call. Counters are
/// derived from this tag directly, never from an exception/error path, so
/// statistics stay accurate under concurrent callers per Design Note §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The space was already pristine; no work was done beyond a digest
    /// walk.
    Hit,
    /// The space was dirty or missing but a pristine template clone served
    /// the request.
    Dirty,
    /// Neither the space nor a usable template existed; a fresh restore
    /// from the catalog (following a build, if the catalog itself was
    /// missing) served the request.
    Miss,
    /// The operation did not complete successfully.
    Failure,
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JournalEvent {
    /// When the event was recorded, as seconds since the Unix epoch.
    pub timestamp_secs: u64,
    /// What kind of operation this event records.
    pub kind: EventKind,
    /// The blueprint involved, rendered as its 16-hex-digit string.
    pub blueprint: Option<String>,
    /// The space name involved, if any.
    pub space: Option<String>,
    /// The controller tag involved, if any.
    pub controller: Option<String>,
    /// How long the operation took.
    pub duration_ms: u64,
    /// The tagged outcome.
    pub outcome: Outcome,
}

impl JournalEvent {
    /// Constructs an event stamped at `when`.
    pub fn new(
        when: SystemTime,
        kind: EventKind,
        blueprint: Option<Blueprint>,
        space: Option<String>,
        controller: Option<String>,
        duration_ms: u64,
        outcome: Outcome,
    ) -> Self {
        JournalEvent {
            timestamp_secs: when.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            kind,
            blueprint: blueprint.map(|b| b.to_hex()),
            space,
            controller,
            duration_ms,
            outcome,
        }
    }

    /// The event's timestamp as a [`SystemTime`].
    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.timestamp_secs)
    }
}

/// Returns the on-disk path of the stats journal under `journal_root`
/// (typically `<home>/journals`).
pub fn journal_path(journal_root: &Path) -> PathBuf {
    journal_root.join("stats.log")
}

/// Appends one event to the journal as a single JSON line, creating the
/// file (and its parent directory) on first use. No lock is taken: a
/// single `write`-syscall-sized line under `OpenOptions::append` cannot
/// interleave with another writer's line on any platform this cache
/// targets.
pub fn append(journal_root: &Path, event: &JournalEvent) -> Result<(), JournalError> {
    fs::create_dir_all(journal_root).map_err(|e| JournalError::io(journal_root, e))?;
    let path = journal_path(journal_root);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| JournalError::io(&path, e))?;
    let mut line = serde_json::to_string(event).expect("JournalEvent always serializes");
    line.push('\n');
    file.write_all(line.as_bytes()).map_err(|e| JournalError::io(&path, e))?;
    tracing::debug!(kind = ?event.kind, outcome = ?event.outcome, "journaled event");
    Ok(())
}

/// Reads every well-formed event out of the journal. A missing journal
/// file reads as empty, not an error. The last line is parsed leniently:
/// if it fails to decode (a writer crashed mid-append) it is skipped
/// rather than failing the whole read; any *earlier* line that fails to
/// decode is still an error, since that indicates real corruption rather
/// than a torn tail write.
pub fn read_all(journal_root: &Path) -> Result<Vec<JournalEvent>, JournalError> {
    let path = journal_path(journal_root);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(&path).map_err(|e| JournalError::io(&path, e))?;
    let lines: Vec<&str> = contents.lines().collect();
    let mut events = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEvent>(line) {
            Ok(event) => events.push(event),
            Err(err) if index == lines.len() - 1 => {
                tracing::warn!(error = %err, "ignoring truncated trailing journal line");
            }
            Err(err) => {
                return Err(JournalError::io(
                    &path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, err),
                ))
            }
        }
    }
    Ok(events)
}

/// Per-outcome counts produced by [`aggregate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    /// Number of `hit` events.
    pub hit: usize,
    /// Number of `dirty` events.
    pub dirty: usize,
    /// Number of `miss` events.
    pub miss: usize,
    /// Number of `failure` events.
    pub failure: usize,
}

impl OutcomeCounts {
    /// Total number of events counted.
    pub fn total(&self) -> usize {
        self.hit + self.dirty + self.miss + self.failure
    }
}

/// Counts events by outcome.
pub fn aggregate(events: &[JournalEvent]) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();
    for event in events {
        match event.outcome {
            Outcome::Hit => counts.hit += 1,
            Outcome::Dirty => counts.dirty += 1,
            Outcome::Miss => counts.miss += 1,
            Outcome::Failure => counts.failure += 1,
        }
    }
    counts
}

/// Counts events by outcome, restricted to those with a timestamp no
/// older than `window` relative to `now`. Used for reporting like "cache
/// hit rate over the last 12 days".
pub fn aggregate_window(events: &[JournalEvent], now: SystemTime, window: Duration) -> OutcomeCounts {
    let cutoff = now.checked_sub(window).unwrap_or(UNIX_EPOCH);
    let recent: Vec<JournalEvent> = events
        .iter()
        .filter(|event| event.timestamp() >= cutoff)
        .cloned()
        .collect();
    aggregate(&recent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use holotree_hash::Fingerprint;

    fn sample_event(when: SystemTime, outcome: Outcome) -> JournalEvent {
        JournalEvent::new(
            when,
            EventKind::SpaceUsed,
            Some(Blueprint::from_fingerprint(Fingerprint::of("demo"))),
            Some("myspace".to_string()),
            Some("vscode".to_string()),
            42,
            outcome,
        )
    }

    #[test]
    fn append_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let event = sample_event(SystemTime::now(), Outcome::Hit);
        append(dir.path(), &event).unwrap();

        let events = read_all(dir.path()).unwrap();
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn read_all_of_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = read_all(dir.path()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn read_all_tolerates_truncated_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let event = sample_event(SystemTime::now(), Outcome::Miss);
        append(dir.path(), &event).unwrap();

        let path = journal_path(dir.path());
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        // Simulate a writer that crashed mid-append: an unparseable
        // fragment with no trailing newline.
        file.write_all(b"{\"timestamp_secs\":").unwrap();

        let events = read_all(dir.path()).unwrap();
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn read_all_rejects_corruption_in_a_non_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(dir.path());
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(&path, "not json at all\n{\"timestamp_secs\":1,\"kind\":\"build\",\"blueprint\":null,\"space\":null,\"controller\":null,\"duration_ms\":1,\"outcome\":\"hit\"}\n").unwrap();
        let err = read_all(dir.path()).unwrap_err();
        assert!(matches!(err, JournalError::Io { .. }));
    }

    #[test]
    fn aggregate_counts_by_outcome() {
        let events = vec![
            sample_event(SystemTime::now(), Outcome::Hit),
            sample_event(SystemTime::now(), Outcome::Hit),
            sample_event(SystemTime::now(), Outcome::Miss),
            sample_event(SystemTime::now(), Outcome::Failure),
        ];
        let counts = aggregate(&events);
        assert_eq!(counts.hit, 2);
        assert_eq!(counts.miss, 1);
        assert_eq!(counts.failure, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn aggregate_window_excludes_events_outside_the_window() {
        let now = SystemTime::now();
        let old = now - Duration::from_secs(20 * 24 * 60 * 60);
        let events = vec![sample_event(old, Outcome::Hit), sample_event(now, Outcome::Miss)];
        let counts = aggregate_window(&events, now, Duration::from_secs(12 * 24 * 60 * 60));
        assert_eq!(counts.hit, 0);
        assert_eq!(counts.miss, 1);
    }

    #[test]
    fn materialize_call_records_space_used_before_list_would_see_it() {
        // Ordering guarantee from §5: a materialize call that returns
        // successfully has already recorded its space-used event.
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), &sample_event(SystemTime::now(), Outcome::Hit)).unwrap();
        append(dir.path(), &sample_event(SystemTime::now(), Outcome::Hit)).unwrap();
        let events = read_all(dir.path()).unwrap();
        assert_eq!(events.len(), 2);
    }
}
