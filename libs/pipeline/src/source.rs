use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{FIELD_CATALOG_ENTRY, FIELD_MESSAGE_ID, FieldValue, LogSource, RawRecord, WaitOutcome};

use crate::error::PipelineError;

/// Upper bound of one blocking wait, so cancellation is noticed promptly.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(100);

// ═══════════════════════════════════════════════════════════════
//  Intake
// ═══════════════════════════════════════════════════════════════

/// Position up to which everything read has reached dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub seq: u64,
    pub cursor: String,
}

/// A record as it travels from the follower towards dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Intake {
    /// Read order, starting at 1.
    pub seq: u64,
    pub record: RawRecord,
    /// Where reading may resume once this record is dispatched.
    pub resume: ResumePoint,
}

impl Intake {
    pub fn new(seq: u64, record: RawRecord) -> Self {
        let resume = ResumePoint {
            seq,
            cursor: record.cursor.clone(),
        };
        Self {
            seq,
            record,
            resume,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowStats {
    pub records: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Follow loop: source → enrich → emit
// ═══════════════════════════════════════════════════════════════

/// Read records in source order and hand each to `emit`.
///
/// Blocks on the source between records. Returns when `token` is
/// cancelled or `emit` reports that nobody listens anymore. A read or
/// wait failure ends the loop with [`PipelineError::SourceRead`].
pub fn follow<F>(
    source: &mut dyn LogSource,
    token: &CancellationToken,
    mut emit: F,
) -> Result<FollowStats, PipelineError>
where
    F: FnMut(Intake) -> bool,
{
    let mut stats = FollowStats::default();
    loop {
        if token.is_cancelled() {
            return Ok(stats);
        }

        match source.next_record() {
            Ok(Some(mut record)) => {
                enrich(source, &mut record);
                stats.records += 1;
                if !emit(Intake::new(stats.records, record)) {
                    tracing::debug!("follower output closed");
                    return Ok(stats);
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "failed to read next record");
                return Err(PipelineError::SourceRead(e));
            }
        }

        // At the end of the source: wait for it to change.
        loop {
            if token.is_cancelled() {
                return Ok(stats);
            }
            match source.wait(WAIT_TIMEOUT) {
                Ok(WaitOutcome::Unchanged) => continue,
                Ok(WaitOutcome::Appended) => break,
                Ok(WaitOutcome::Invalidated) => {
                    tracing::debug!("source files changed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to wait for new records");
                    return Err(PipelineError::SourceRead(e));
                }
            }
        }
    }
}

/// Attach the catalog text for records that carry a message id.
fn enrich(source: &mut dyn LogSource, record: &mut RawRecord) {
    if !record.fields.contains_key(FIELD_MESSAGE_ID) {
        return;
    }
    match source.catalog(record) {
        Ok(Some(entry)) => {
            record
                .fields
                .insert(FIELD_CATALOG_ENTRY.to_string(), FieldValue::Text(entry));
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(cursor = %record.cursor, error = %e, "catalog lookup failed");
        }
    }
}

/// Run [`follow`] on a blocking thread, sending records into `out`.
pub fn spawn_follower(
    mut source: Box<dyn LogSource>,
    out: mpsc::Sender<Intake>,
    token: CancellationToken,
) -> JoinHandle<Result<FollowStats, PipelineError>> {
    tokio::task::spawn_blocking(move || {
        tracing::info!("follower started");
        let result = follow(&mut *source, &token, |intake| out.blocking_send(intake).is_ok());
        match &result {
            Ok(stats) => tracing::info!(records = stats.records, "follower finished"),
            Err(e) => tracing::error!(error = %e, "follower stopped"),
        }
        result
    })
}
