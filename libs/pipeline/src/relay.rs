use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_api::{DeliverySink, LogSource};

use crate::checkpoint::spawn_cursor_writer;
use crate::config::PipelineConfig;
use crate::continuation::{ContinuationBuffer, spawn_continuation};
use crate::error::PipelineError;
use crate::position::{StartedAt, seek_start};
use crate::sink::{DispatchStats, Dispatcher};
use crate::source::{FollowStats, spawn_follower};
use crate::tracker::{PendingStore, TrackerConfig, TrackerReport, spawn_tracker};
use crate::transform::TransformOptions;

/// Summary of one relay run.
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub started_at: StartedAt,
    pub follow: FollowStats,
    pub dispatch: DispatchStats,
    pub tracker: TrackerReport,
    /// Last cursor handed to the persister, if checkpointing is on.
    pub checkpoint: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  run_relay: follower → [continuation] → dispatch → sink
// ═══════════════════════════════════════════════════════════════

/// Relay records from `source` to `sink` until `token` is cancelled or the
/// source fails.
///
/// Records left pending by the previous run are dispatched before any new
/// record. Shutdown runs in pipeline order: dispatch stops, the tracker
/// and the cursor persister see their inputs close, the sink releases its
/// handles, then both files are written one last time. Closing the sink
/// and draining its acknowledgments are each bounded by `drain_timeout`.
pub async fn run_relay(
    mut source: Box<dyn LogSource>,
    sink: Arc<dyn DeliverySink>,
    config: &PipelineConfig,
    token: CancellationToken,
) -> Result<RelayReport, PipelineError> {
    config.validate().map_err(PipelineError::Config)?;

    // --- Position the source ---
    let input = config.input.clone();
    let (source, started_at) = tokio::task::spawn_blocking(move || {
        seek_start(&mut *source, &input).map(|started| (source, started))
    })
    .await??;

    // --- Delivery tracker ---
    let store = PendingStore::new(&config.pending_queue.file);
    let replay = store.load();
    let (pending_tx, pending_rx) = mpsc::channel(config.channel_buffer);
    let (completed_tx, completed_rx) = mpsc::unbounded_channel();
    let tracker = spawn_tracker(
        store,
        TrackerConfig {
            flush_period: config.pending_queue.flush_period(),
            drain_timeout: config.pending_queue.drain_timeout(),
        },
        replay.clone(),
        pending_rx,
        completed_rx,
        token.clone(),
    );

    // --- Cursor persister ---
    let (cursor_tx, cursor_writer) = if config.input.write_cursor_state {
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        let handle = spawn_cursor_writer(
            config.input.cursor_state_file.clone(),
            config.input.cursor_flush_period(),
            rx,
        );
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };

    // --- Follower (+ continuation) ---
    let (raw_tx, raw_rx) = mpsc::channel(config.channel_buffer);
    let follower = spawn_follower(source, raw_tx, token.clone());
    let (mut intake_rx, continuation) = if config.continuation.enabled {
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        let buffer = ContinuationBuffer::new(
            config.continuation.stream_key_fields.clone(),
            config.continuation.staleness(),
        );
        let handle = spawn_continuation(buffer, raw_rx, tx, config.continuation.sweep_interval());
        (rx, Some(handle))
    } else {
        (raw_rx, None)
    };

    // --- Dispatch ---
    let mut dispatcher = Dispatcher::new(
        sink.clone(),
        TransformOptions::from(&config.input),
        pending_tx,
        completed_tx,
        cursor_tx,
    );
    dispatcher.replay(replay, &token).await;
    dispatcher.run(&mut intake_rx, &token).await;

    // --- Ordered shutdown ---
    let (completed_tx, dispatch) = dispatcher.finish();
    drop(intake_rx);
    if tokio::time::timeout(config.pending_queue.drain_timeout(), sink.close())
        .await
        .is_err()
    {
        tracing::warn!("sink did not close within drain timeout");
    }
    drop(completed_tx);

    let tracker = tracker.await?;
    let checkpoint = match cursor_writer {
        Some(handle) => handle.await?,
        None => None,
    };
    if let Some(handle) = continuation {
        handle.await?;
    }
    let follow = follower.await??;

    tracing::info!(
        records = follow.records,
        dispatched = dispatch.dispatched,
        pending = tracker.remaining,
        "relay stopped"
    );
    Ok(RelayReport {
        started_at,
        follow,
        dispatch,
        tracker,
        checkpoint,
    })
}
