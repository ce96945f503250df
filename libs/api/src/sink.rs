use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::types::OutputRecord;

// ════════════════════════════════════════════════════════════════
//  Outcome / AckHandle
// ════════════════════════════════════════════════════════════════

/// Final delivery state of one dispatched record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Failed(String),
    Cancelled,
}

/// Acknowledgment handle travelling with a dispatched record.
///
/// Consumed by `ack`, `fail` or `cancel`, so a record resolves at most once.
/// A handle dropped without being resolved counts as cancelled. Only an
/// acknowledgment reaches the delivery tracker; failed and cancelled records
/// stay pending and are re-dispatched after a restart.
pub struct AckHandle {
    cursor: String,
    completed: Option<mpsc::UnboundedSender<String>>,
}

impl AckHandle {
    pub fn new(cursor: impl Into<String>, completed: mpsc::UnboundedSender<String>) -> Self {
        Self {
            cursor: cursor.into(),
            completed: Some(completed),
        }
    }

    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn ack(self) {
        self.resolve(Outcome::Acked);
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.resolve(Outcome::Failed(reason.into()));
    }

    pub fn cancel(self) {
        self.resolve(Outcome::Cancelled);
    }

    pub fn resolve(mut self, outcome: Outcome) {
        let Some(completed) = self.completed.take() else {
            return;
        };
        match outcome {
            Outcome::Acked => {
                if completed.send(std::mem::take(&mut self.cursor)).is_err() {
                    tracing::debug!("delivery tracker gone, acknowledgment dropped");
                }
            }
            Outcome::Failed(reason) => {
                tracing::warn!(cursor = %self.cursor, %reason, "failed to deliver record");
            }
            Outcome::Cancelled => {
                tracing::debug!(cursor = %self.cursor, "delivery was cancelled");
            }
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if self.completed.is_some() {
            tracing::debug!(cursor = %self.cursor, "ack handle dropped unresolved, treating as cancelled");
        }
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle").field("cursor", &self.cursor).finish()
    }
}

// ════════════════════════════════════════════════════════════════
//  DeliverySink
// ════════════════════════════════════════════════════════════════

/// Downstream delivery target.
///
/// `dispatch` may suspend until the sink accepts the record (backpressure)
/// and returns whether it did. The `AckHandle` is resolved asynchronously,
/// exactly once, after the sink knows the delivery result.
pub trait DeliverySink: Send + Sync {
    fn dispatch(
        &self,
        record: OutputRecord,
        ack: AckHandle,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Stop accepting records, finish in-flight deliveries and release every
    /// outstanding `AckHandle`.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
