use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::persist::write_atomic;

// ═══════════════════════════════════════════════════════════════
//  Cursor state file
// ═══════════════════════════════════════════════════════════════

/// Read the saved resume cursor. Missing, unreadable or blank files yield `None`.
pub fn load_checkpoint(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cursor = content.trim();
            if cursor.is_empty() {
                tracing::warn!(path = %path.display(), "cursor state file is empty");
                None
            } else {
                Some(cursor.to_string())
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no cursor state file");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read cursor state file");
            None
        }
    }
}

/// Atomically store `cursor` as the whole content of `path`.
pub fn save_checkpoint(path: &Path, cursor: &str) -> std::io::Result<()> {
    write_atomic(path, |w| w.write_all(cursor.as_bytes()))
}

// ═══════════════════════════════════════════════════════════════
//  Cursor writer task
// ═══════════════════════════════════════════════════════════════

/// Spawn the cursor persister.
///
/// Keeps the latest cursor received on `cursors` and writes it every
/// `period` when it changed since the last write. When the channel closes
/// the latest cursor is written once more and returned.
pub fn spawn_cursor_writer(
    path: PathBuf,
    period: Duration,
    mut cursors: mpsc::Receiver<String>,
) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut latest: Option<String> = None;
        let mut written: Option<String> = None;

        loop {
            tokio::select! {
                next = cursors.recv() => match next {
                    Some(cursor) => latest = Some(cursor),
                    None => break,
                },
                _ = ticker.tick() => {
                    if latest == written {
                        continue;
                    }
                    if let Some(cursor) = &latest {
                        match save_checkpoint(&path, cursor) {
                            Ok(()) => {
                                tracing::debug!(cursor = %cursor, "cursor state written");
                                written = latest.clone();
                            }
                            Err(e) => {
                                tracing::error!(path = %path.display(), error = %e, "failed to write cursor state");
                            }
                        }
                    }
                }
            }
        }

        if let Some(cursor) = &latest {
            match save_checkpoint(&path, cursor) {
                Ok(()) => tracing::info!(cursor = %cursor, "final cursor state written"),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to write final cursor state");
                }
            }
        }
        tracing::info!("cursor writer finished");
        latest
    })
}
