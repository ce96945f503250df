use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use relay_api::{OutputRecord, PendingReference};

use crate::persist::write_atomic;

/// Cursor → body of every record dispatched but not yet acknowledged.
pub type PendingMap = BTreeMap<String, OutputRecord>;

// ═══════════════════════════════════════════════════════════════
//  PendingState
// ═══════════════════════════════════════════════════════════════

/// In-memory pending and completed sets.
///
/// Completed cursors are subtracted from the pending set on the next
/// reconciliation; until then both sets only grow.
#[derive(Debug, Default)]
pub struct PendingState {
    pending: PendingMap,
    completed: HashSet<String>,
    changed: bool,
}

impl PendingState {
    /// Start from a previously persisted pending set. Loading is not a change.
    pub fn with_pending(pending: PendingMap) -> Self {
        Self {
            pending,
            completed: HashSet::new(),
            changed: false,
        }
    }

    pub fn add_pending(&mut self, reference: PendingReference) {
        self.pending.insert(reference.cursor, reference.body);
        self.changed = true;
    }

    pub fn add_completed(&mut self, cursor: String) {
        self.completed.insert(cursor);
        self.changed = true;
    }

    pub fn pending(&self) -> &PendingMap {
        &self.pending
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Subtract completed from pending and clear completed.
    ///
    /// Returns the new pending set, or `None` when nothing changed since the
    /// last [`mark_flushed`](Self::mark_flushed).
    pub fn reconcile(&mut self) -> Option<&PendingMap> {
        if !self.changed {
            return None;
        }
        self.subtract();
        Some(&self.pending)
    }

    /// The reconciled set reached disk; later ticks skip until new input.
    pub fn mark_flushed(&mut self) {
        self.changed = false;
    }

    /// Final reconciliation on shutdown.
    pub fn finish(mut self) -> PendingMap {
        self.subtract();
        self.pending
    }

    fn subtract(&mut self) {
        let completed = std::mem::take(&mut self.completed);
        self.pending.retain(|cursor, _| !completed.contains(cursor));
    }
}

// ═══════════════════════════════════════════════════════════════
//  PendingStore
// ═══════════════════════════════════════════════════════════════

/// JSON object file holding the pending set between runs.
#[derive(Debug, Clone)]
pub struct PendingStore {
    path: PathBuf,
}

impl PendingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved pending set. A missing or unparsable file is an empty set.
    pub fn load(&self) -> PendingMap {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no pending queue file");
                return PendingMap::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not read pending queue file");
                return PendingMap::new();
            }
        };
        match serde_json::from_slice::<PendingMap>(&content) {
            Ok(pending) => {
                tracing::info!(count = pending.len(), "loaded pending queue");
                pending
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "pending queue file is corrupt, ignoring it");
                PendingMap::new()
            }
        }
    }

    /// Atomically replace the file with `pending`.
    pub fn store(&self, pending: &PendingMap) -> io::Result<()> {
        write_atomic(&self.path, |w| serde_json::to_writer(w, pending).map_err(io::Error::from))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tracker task
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub flush_period: Duration,
    /// Upper bound on waiting for outstanding acknowledgments at shutdown.
    pub drain_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerReport {
    /// Records left pending after the final flush.
    pub remaining: usize,
    pub flushes: u64,
    pub flush_errors: u64,
}

/// Spawn the delivery tracker.
///
/// Pending references are taken before acknowledgments, so a completion
/// can never be reconciled ahead of its own pending entry when both are
/// queued. Every `flush_period` the reconciled set is persisted, unless
/// nothing changed. On cancellation, or once `pending` closes, the tracker
/// drains `pending` to the end and `completed` until every sender is gone
/// or `drain_timeout` passes, then persists one last time.
pub fn spawn_tracker(
    store: PendingStore,
    config: TrackerConfig,
    initial: PendingMap,
    mut pending: mpsc::Receiver<PendingReference>,
    mut completed: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
) -> JoinHandle<TrackerReport> {
    tokio::spawn(async move {
        let mut state = PendingState::with_pending(initial);
        let mut report = TrackerReport::default();
        let mut ticker = tokio::time::interval(config.flush_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut completed_open = true;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = pending.recv() => match next {
                    Some(reference) => state.add_pending(reference),
                    None => break,
                },
                next = completed.recv(), if completed_open => match next {
                    Some(cursor) => state.add_completed(cursor),
                    None => completed_open = false,
                },
                _ = ticker.tick() => {
                    let Some(snapshot) = state.reconcile() else {
                        tracing::trace!("pending queue unchanged");
                        continue;
                    };
                    match store.store(snapshot) {
                        Ok(()) => {
                            report.flushes += 1;
                            tracing::debug!(count = snapshot.len(), "pending queue written");
                            state.mark_flushed();
                        }
                        // Still dirty: the next tick retries.
                        Err(e) => {
                            report.flush_errors += 1;
                            tracing::error!(path = %store.path().display(), error = %e, "failed to write pending queue");
                        }
                    }
                }
            }
        }

        // Dispatch closes `pending` once it stopped.
        while let Some(reference) = pending.recv().await {
            state.add_pending(reference);
        }
        if completed_open {
            let drained = tokio::time::timeout(config.drain_timeout, async {
                while let Some(cursor) = completed.recv().await {
                    state.add_completed(cursor);
                }
            })
            .await;
            if drained.is_err() {
                tracing::warn!("acknowledgments still outstanding after drain timeout");
            }
        }

        let remaining = state.finish();
        report.remaining = remaining.len();
        tracing::info!(count = remaining.len(), "saving pending queue");
        match store.store(&remaining) {
            Ok(()) => report.flushes += 1,
            Err(e) => {
                report.flush_errors += 1;
                tracing::error!(path = %store.path().display(), error = %e, "failed to write final pending queue");
            }
        }
        report
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(message: &str) -> OutputRecord {
        let mut body = OutputRecord::new();
        body.insert("message", message);
        body
    }

    fn reference(cursor: &str) -> PendingReference {
        PendingReference::new(cursor, body(cursor))
    }

    fn cursors(map: &PendingMap) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            flush_period: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn reconcile_subtracts_and_skips_when_unchanged() {
        let mut state = PendingState::default();
        assert!(state.reconcile().is_none());

        for c in ["c1", "c2", "c3"] {
            state.add_pending(reference(c));
        }
        state.add_completed("c2".into());
        assert_eq!(cursors(state.reconcile().unwrap()), vec!["c1", "c3"]);
        // Not flushed yet, so the set is offered again.
        assert_eq!(cursors(state.reconcile().unwrap()), vec!["c1", "c3"]);
        state.mark_flushed();
        assert!(state.reconcile().is_none());

        // A completion for an unknown cursor still counts as a change but removes nothing.
        state.add_completed("zz".into());
        assert_eq!(cursors(state.reconcile().unwrap()), vec!["c1", "c3"]);
    }

    #[test]
    fn any_interleaving_leaves_the_difference() {
        let orders: [&[(&str, bool)]; 3] = [
            &[("c1", false), ("c2", false), ("c1", true), ("c3", false), ("c2", true)],
            &[("c1", false), ("c1", true), ("c2", false), ("c3", false), ("c3", true)],
            &[("c3", false), ("c2", false), ("c1", false), ("c2", true)],
        ];
        for ops in orders {
            let mut state = PendingState::default();
            let mut expected: BTreeMap<&str, ()> = BTreeMap::new();
            for (i, (cursor, done)) in ops.iter().enumerate() {
                if *done {
                    state.add_completed(cursor.to_string());
                    expected.remove(*cursor);
                } else {
                    state.add_pending(reference(cursor));
                    expected.insert(*cursor, ());
                }
                if i % 2 == 1 {
                    state.reconcile();
                }
            }
            let left = state.finish();
            assert_eq!(cursors(&left), expected.keys().copied().collect::<Vec<_>>());
        }
    }

    #[test]
    fn loaded_state_is_not_a_change() {
        let mut initial = PendingMap::new();
        initial.insert("c1".into(), body("c1"));
        let mut state = PendingState::with_pending(initial);
        assert!(!state.is_changed());
        assert!(state.reconcile().is_none());
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn store_round_trips_typed_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path().join("pending"));

        let mut record = OutputRecord::new();
        record.insert("message", "m");
        record.insert("pid", 812u64);
        record.insert("offset", -3i64);
        record.insert("load", 0.75);
        record.insert("ok", true);
        record.insert("meta", json!({"unit": "a.service"}));
        let mut pending = PendingMap::new();
        pending.insert("c1".into(), record.clone());

        store.store(&pending).unwrap();
        assert_eq!(store.load(), pending);
    }

    #[test]
    fn load_missing_or_corrupt_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path().join("pending"));
        assert!(store.load().is_empty());

        std::fs::write(store.path(), b"{\"c1\": {\"message\": ").unwrap();
        assert!(store.load().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_persists_unacknowledged_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path().join("pending"));
        let (pending_tx, pending_rx) = mpsc::channel(16);
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = spawn_tracker(
            store.clone(),
            config(),
            PendingMap::new(),
            pending_rx,
            completed_rx,
            token.clone(),
        );

        for c in ["c1", "c2", "c3", "c4", "c5"] {
            pending_tx.send(reference(c)).await.unwrap();
        }
        completed_tx.send("c2".into()).unwrap();
        completed_tx.send("c4".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cursors(&store.load()), vec!["c1", "c3", "c5"]);

        // Nothing new: the file is not written again.
        std::fs::remove_file(store.path()).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!store.path().exists());

        completed_tx.send("c1".into()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cursors(&store.load()), vec!["c3", "c5"]);

        token.cancel();
        drop(pending_tx);
        drop(completed_tx);
        let report = handle.await.unwrap();
        assert_eq!(report.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_retried_on_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let store = PendingStore::new(queue_dir.join("pending"));
        let (pending_tx, pending_rx) = mpsc::channel(16);
        let (completed_tx, completed_rx) = mpsc::unbounded_channel::<String>();
        let token = CancellationToken::new();
        let handle = spawn_tracker(
            store.clone(),
            config(),
            PendingMap::new(),
            pending_rx,
            completed_rx,
            token.clone(),
        );

        pending_tx.send(reference("c1")).await.unwrap();
        // The directory is missing for the first tick.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!store.path().exists());

        std::fs::create_dir(&queue_dir).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cursors(&store.load()), vec!["c1"]);

        token.cancel();
        drop(pending_tx);
        drop(completed_tx);
        let report = handle.await.unwrap();
        assert_eq!(report.flush_errors, 1);
        // Retry tick plus the final store.
        assert_eq!(report.flushes, 2);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_queued_acknowledgments() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path().join("pending"));
        let (pending_tx, pending_rx) = mpsc::channel(16);
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = spawn_tracker(
            store.clone(),
            config(),
            PendingMap::new(),
            pending_rx,
            completed_rx,
            token.clone(),
        );

        token.cancel();
        pending_tx.send(reference("c1")).await.unwrap();
        pending_tx.send(reference("c2")).await.unwrap();
        drop(pending_tx);
        completed_tx.send("c1".into()).unwrap();
        drop(completed_tx);

        let report = handle.await.unwrap();
        assert_eq!(report.remaining, 1);
        assert_eq!(cursors(&store.load()), vec!["c2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_bounds_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path().join("pending"));
        let (pending_tx, pending_rx) = mpsc::channel(16);
        let (completed_tx, completed_rx) = mpsc::unbounded_channel::<String>();
        let token = CancellationToken::new();
        let mut initial = PendingMap::new();
        initial.insert("c0".into(), body("c0"));
        let handle = spawn_tracker(
            store.clone(),
            config(),
            initial,
            pending_rx,
            completed_rx,
            token.clone(),
        );

        drop(pending_tx);
        // `completed_tx` stays alive: a sink that never resolves its handles.
        let report = handle.await.unwrap();
        assert_eq!(report.remaining, 1);
        assert_eq!(cursors(&store.load()), vec!["c0"]);
        drop(completed_tx);
    }
}
