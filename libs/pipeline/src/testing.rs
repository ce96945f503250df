//! Test doubles: a scripted log source and a recording sink.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_api::{
    AckHandle, DeliverySink, FIELD_MESSAGE_ID, FieldValue, LogSource, OutputRecord, PluginError,
    RawRecord, WaitOutcome,
};

/// A record with a cursor and message; timestamps grow with the cursor.
pub fn record(cursor: &str, message: &str) -> RawRecord {
    let ts = 1_700_000_000_000_000 + cursor.len() as u64;
    RawRecord::new(cursor, ts)
        .with_field("MESSAGE", message)
        .with_field("__CURSOR", cursor)
}

// ═══════════════════════════════════════════════════════════════
//  ScriptedSource
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Script {
    records: Vec<RawRecord>,
    pos: usize,
    fail_after: Option<(usize, String)>,
    catalog: HashMap<String, String>,
}

/// In-memory source. Clones share the same script, so a test can append
/// records while a follower owns another clone.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        let source = Self::default();
        source.inner.lock().unwrap().records = records;
        source
    }

    pub fn append(&self, record: RawRecord) {
        self.inner.lock().unwrap().records.push(record);
    }

    /// Fail every read once `reads` records were returned.
    pub fn fail_after(&mut self, reads: usize, message: &str) {
        self.inner.lock().unwrap().fail_after = Some((reads, message.to_string()));
    }

    pub fn add_catalog(&mut self, message_id: &str, text: &str) {
        self.inner
            .lock()
            .unwrap()
            .catalog
            .insert(message_id.to_string(), text.to_string());
    }

    pub fn position(&self) -> usize {
        self.inner.lock().unwrap().pos
    }
}

impl LogSource for ScriptedSource {
    fn next_record(&mut self) -> Result<Option<RawRecord>, PluginError> {
        let mut script = self.inner.lock().unwrap();
        if let Some((after, message)) = &script.fail_after {
            if script.pos >= *after {
                return Err(PluginError::io(message.clone()));
            }
        }
        if script.pos < script.records.len() {
            let record = script.records[script.pos].clone();
            script.pos += 1;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, PluginError> {
        {
            let script = self.inner.lock().unwrap();
            if script.pos < script.records.len() {
                return Ok(WaitOutcome::Appended);
            }
        }
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(WaitOutcome::Unchanged)
    }

    fn seek_head(&mut self) -> Result<(), PluginError> {
        self.inner.lock().unwrap().pos = 0;
        Ok(())
    }

    fn seek_tail(&mut self) -> Result<(), PluginError> {
        let mut script = self.inner.lock().unwrap();
        script.pos = script.records.len();
        Ok(())
    }

    fn seek_cursor(&mut self, cursor: &str) -> Result<(), PluginError> {
        let mut script = self.inner.lock().unwrap();
        match script.records.iter().position(|r| r.cursor == cursor) {
            Some(idx) => {
                script.pos = idx;
                Ok(())
            }
            None => Err(PluginError::not_found(format!("cursor {cursor}"))),
        }
    }

    fn catalog(&mut self, record: &RawRecord) -> Result<Option<String>, PluginError> {
        let script = self.inner.lock().unwrap();
        Ok(record
            .field(FIELD_MESSAGE_ID)
            .and_then(FieldValue::as_text)
            .and_then(|id| script.catalog.get(id).cloned()))
    }
}

// ═══════════════════════════════════════════════════════════════
//  RecordingSink
// ═══════════════════════════════════════════════════════════════

/// What the recording sink does with each handle.
pub enum AckPolicy {
    AckAll,
    /// Acknowledge only these cursors, hold the rest.
    AckOnly(HashSet<String>),
    /// Hold every handle until released by the test.
    Hold,
    /// Refuse every dispatch.
    Reject,
}

pub struct RecordingSink {
    policy: AckPolicy,
    /// `close` never completes, as with a writer stuck on a full pipe.
    stall_close: bool,
    dispatched: Mutex<Vec<(String, OutputRecord)>>,
    held: Mutex<Vec<AckHandle>>,
}

impl RecordingSink {
    pub fn new(policy: AckPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            stall_close: false,
            dispatched: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn stalling_on_close(policy: AckPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            stall_close: true,
            dispatched: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn cursors(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(cursor, _)| cursor.clone())
            .collect()
    }

    pub fn records(&self) -> Vec<OutputRecord> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }

    /// Acknowledge held handles, newest first.
    pub fn ack_held_reversed(&self) {
        let held: Vec<AckHandle> = self.held.lock().unwrap().drain(..).collect();
        for ack in held.into_iter().rev() {
            ack.ack();
        }
    }

    /// Poll until `n` records were dispatched.
    pub async fn wait_for(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.count() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} dispatches, got {}",
                self.count()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl DeliverySink for RecordingSink {
    fn dispatch(
        &self,
        record: OutputRecord,
        ack: AckHandle,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let accepted = match &self.policy {
            AckPolicy::Reject => false,
            AckPolicy::AckAll => {
                self.dispatched.lock().unwrap().push((ack.cursor().to_string(), record));
                ack.ack();
                true
            }
            AckPolicy::AckOnly(cursors) => {
                self.dispatched.lock().unwrap().push((ack.cursor().to_string(), record));
                if cursors.contains(ack.cursor()) {
                    ack.ack();
                } else {
                    self.held.lock().unwrap().push(ack);
                }
                true
            }
            AckPolicy::Hold => {
                self.dispatched.lock().unwrap().push((ack.cursor().to_string(), record));
                self.held.lock().unwrap().push(ack);
                true
            }
        };
        Box::pin(async move { accepted })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        if self.stall_close {
            return Box::pin(std::future::pending());
        }
        // Handles still held are released as cancelled.
        let held: Vec<AckHandle> = self.held.lock().unwrap().drain(..).collect();
        Box::pin(async move {
            for ack in held {
                ack.cancel();
            }
        })
    }
}
