use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use relay_api::{FIELD_CURSOR, FIELD_MESSAGE, FieldValue};

use crate::source::{Intake, ResumePoint};

/// Separator between key field values in a stream key.
const KEY_SEPARATOR: char = '\u{1f}';

/// A message starting with a space or tab continues the previous one.
pub fn is_continuation(message: &str) -> bool {
    message.starts_with(' ') || message.starts_with('\t')
}

struct Buffered {
    intake: Intake,
    /// First record of the group; reading resumes here while it is held.
    start: ResumePoint,
    updated: Instant,
}

// ═══════════════════════════════════════════════════════════════
//  ContinuationBuffer
// ═══════════════════════════════════════════════════════════════

/// Per-stream buffer that folds continuation lines into the record before them.
///
/// A merged record keeps the first record's fields, joins messages with
/// `\n` and takes the cursor (field included) and sequence of its last
/// line. Records of unrelated streams never merge.
pub struct ContinuationBuffer {
    key_fields: Vec<String>,
    staleness: Duration,
    streams: HashMap<String, Buffered>,
}

impl ContinuationBuffer {
    pub fn new(key_fields: Vec<String>, staleness: Duration) -> Self {
        Self {
            key_fields,
            staleness,
            streams: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    fn stream_key(&self, intake: &Intake) -> String {
        let mut key = String::new();
        for (i, name) in self.key_fields.iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            if let Some(value) = intake.record.field(name).and_then(FieldValue::as_text) {
                key.push_str(value);
            }
        }
        key
    }

    /// Take in the next record of its stream.
    ///
    /// Returns the record that was buffered for the stream when `intake`
    /// does not continue it.
    pub fn push(&mut self, intake: Intake, now: Instant) -> Option<Intake> {
        let key = self.stream_key(&intake);

        if let Some(line) = intake.record.message().filter(|m| is_continuation(m)) {
            if let Some(buffered) = self.streams.get_mut(&key) {
                if let Some(joined) = buffered
                    .intake
                    .record
                    .message()
                    .map(|prev| format!("{prev}\n{line}"))
                {
                    let held = &mut buffered.intake;
                    held.record
                        .fields
                        .insert(FIELD_MESSAGE.to_string(), FieldValue::Text(joined));
                    if held.record.fields.contains_key(FIELD_CURSOR) {
                        held.record.fields.insert(
                            FIELD_CURSOR.to_string(),
                            FieldValue::Text(intake.record.cursor.clone()),
                        );
                    }
                    held.record.cursor = intake.record.cursor;
                    held.seq = intake.seq;
                    held.resume = intake.resume;
                    buffered.updated = now;
                    return None;
                }
            }
        }

        let start = intake.resume.clone();
        let flushed = self.streams.insert(
            key,
            Buffered {
                intake,
                start,
                updated: now,
            },
        );
        flushed.and_then(|b| self.release(vec![b]).pop())
    }

    /// Release every record idle for at least the staleness window, oldest first.
    pub fn sweep(&mut self, now: Instant) -> Vec<Intake> {
        let staleness = self.staleness;
        let stale: Vec<String> = self
            .streams
            .iter()
            .filter(|(_, b)| now.duration_since(b.updated) >= staleness)
            .map(|(key, _)| key.clone())
            .collect();
        let batch: Vec<Buffered> = stale
            .iter()
            .filter_map(|key| self.streams.remove(key))
            .collect();
        self.release(batch)
    }

    /// Release everything, oldest first.
    pub fn drain(&mut self) -> Vec<Intake> {
        let batch: Vec<Buffered> = self.streams.drain().map(|(_, b)| b).collect();
        self.release(batch)
    }

    /// Order a batch for output. While an older group is still held, here
    /// or later in the batch, a record's resume point stays at that group's
    /// first line.
    fn release(&self, mut batch: Vec<Buffered>) -> Vec<Intake> {
        batch.sort_by_key(|b| b.intake.seq);
        let held_back: Vec<Option<ResumePoint>> = (0..batch.len())
            .map(|i| {
                self.streams
                    .values()
                    .chain(&batch[i + 1..])
                    .map(|b| &b.start)
                    .min_by_key(|start| start.seq)
                    .filter(|oldest| oldest.seq < batch[i].intake.resume.seq)
                    .cloned()
            })
            .collect();

        batch
            .into_iter()
            .zip(held_back)
            .map(|(b, held_back)| {
                let mut intake = b.intake;
                if let Some(resume) = held_back {
                    intake.resume = resume;
                }
                intake
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Continuation task
// ═══════════════════════════════════════════════════════════════

/// Run the buffer between the follower and dispatch.
///
/// Ends when `input` closes (remaining records are flushed in order) or
/// when `output` is gone.
pub fn spawn_continuation(
    mut buffer: ContinuationBuffer,
    mut input: mpsc::Receiver<Intake>,
    output: mpsc::Sender<Intake>,
    sweep_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = input.recv() => match next {
                    Some(intake) => {
                        if let Some(ready) = buffer.push(intake, Instant::now()) {
                            if output.send(ready).await.is_err() {
                                tracing::debug!(held = buffer.len(), "continuation output closed");
                                return;
                            }
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    for ready in buffer.sweep(Instant::now()) {
                        if output.send(ready).await.is_err() {
                            tracing::debug!(held = buffer.len(), "continuation output closed");
                            return;
                        }
                    }
                }
            }
        }

        for ready in buffer.drain() {
            if output.send(ready).await.is_err() {
                break;
            }
        }
        tracing::info!("continuation buffer finished");
    })
}
