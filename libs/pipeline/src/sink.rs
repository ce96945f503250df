use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_api::{AckHandle, DeliverySink, OutputRecord, PendingReference};

use crate::source::Intake;
use crate::tracker::PendingMap;
use crate::transform::{TransformOptions, transform};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Records from the previous run accepted by the sink.
    pub replayed: u64,
    pub dispatched: u64,
    /// Records the sink refused; they stay pending.
    pub rejected: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Dispatcher: intake → transform → tracker + sink.dispatch()
// ═══════════════════════════════════════════════════════════════

/// Hands records to the sink while keeping the tracker and the cursor
/// persister informed.
pub(crate) struct Dispatcher {
    sink: Arc<dyn DeliverySink>,
    options: TransformOptions,
    pending: mpsc::Sender<PendingReference>,
    completed: mpsc::UnboundedSender<String>,
    cursors: Option<mpsc::Sender<String>>,
    /// Sequence of the last resume point sent to the cursor persister.
    last_resume: u64,
    stats: DispatchStats,
}

impl Dispatcher {
    pub(crate) fn new(
        sink: Arc<dyn DeliverySink>,
        options: TransformOptions,
        pending: mpsc::Sender<PendingReference>,
        completed: mpsc::UnboundedSender<String>,
        cursors: Option<mpsc::Sender<String>>,
    ) -> Self {
        Self {
            sink,
            options,
            pending,
            completed,
            cursors,
            last_resume: 0,
            stats: DispatchStats::default(),
        }
    }

    /// Re-dispatch records left pending by the previous run.
    ///
    /// They are already in the tracker's pending set, so only the sink
    /// sees them again.
    pub(crate) async fn replay(&mut self, pending: PendingMap, token: &CancellationToken) {
        if pending.is_empty() {
            return;
        }
        tracing::info!(count = pending.len(), "re-dispatching pending records");
        for (cursor, body) in pending {
            let ack = AckHandle::new(cursor.clone(), self.completed.clone());
            let accepted = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                accepted = self.sink.dispatch(body, ack) => accepted,
            };
            if accepted {
                self.stats.replayed += 1;
            } else {
                self.stats.rejected += 1;
                tracing::warn!(cursor = %cursor, "sink refused pending record");
            }
        }
    }

    /// Dispatch everything from `intake` until it closes or `token` fires.
    pub(crate) async fn run(&mut self, intake: &mut mpsc::Receiver<Intake>, token: &CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = intake.recv() => next,
            };
            let Some(next) = next else { break };
            if !self.dispatch(next, token).await {
                break;
            }
        }
        tracing::info!(
            dispatched = self.stats.dispatched,
            rejected = self.stats.rejected,
            "dispatch finished"
        );
    }

    /// Returns `false` when dispatching has to stop.
    async fn dispatch(&mut self, intake: Intake, token: &CancellationToken) -> bool {
        let Intake { record, resume, .. } = intake;
        let body: OutputRecord = transform(&record, &self.options);
        let cursor = record.cursor;

        // The tracker learns about the record before any acknowledgment can exist.
        let reference = PendingReference::new(cursor.clone(), body.clone());
        if self.pending.send(reference).await.is_err() {
            tracing::error!(cursor = %cursor, "delivery tracker stopped");
            return false;
        }

        let ack = AckHandle::new(cursor.clone(), self.completed.clone());
        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(cursor = %cursor, "dispatch interrupted by shutdown");
                return false;
            }
            accepted = self.sink.dispatch(body, ack) => accepted,
        };
        if !accepted {
            self.stats.rejected += 1;
            tracing::warn!(cursor = %cursor, "sink refused record, kept pending");
            return true;
        }
        self.stats.dispatched += 1;

        if resume.seq > self.last_resume {
            self.last_resume = resume.seq;
            if let Some(cursors) = &self.cursors {
                if cursors.send(resume.cursor).await.is_err() {
                    tracing::warn!("cursor persister stopped");
                    self.cursors = None;
                }
            }
        }
        true
    }

    /// Stop feeding the tracker and the cursor persister.
    ///
    /// The acknowledgment sender is handed back so the caller can keep it
    /// open until the sink has released its handles.
    pub(crate) fn finish(self) -> (mpsc::UnboundedSender<String>, DispatchStats) {
        (self.completed, self.stats)
    }
}
