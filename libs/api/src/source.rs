use std::time::Duration;

use crate::error::PluginError;
use crate::types::{RawRecord, WaitOutcome};

/// Native access to an append-only log source.
///
/// Implementations are blocking and owned by exactly one thread (the
/// follower). Seeks are only valid before the follower starts reading.
pub trait LogSource: Send {
    /// Advance by one record. `Ok(None)` means "at the tail right now",
    /// any `Err` is an unrecoverable read fault.
    fn next_record(&mut self) -> Result<Option<RawRecord>, PluginError>;

    /// Block until the source changes or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, PluginError>;

    fn seek_head(&mut self) -> Result<(), PluginError>;

    /// Position after the last record; the next read only returns records
    /// appended from now on.
    fn seek_tail(&mut self) -> Result<(), PluginError>;

    /// Position at the record identified by `cursor`, so that the next read
    /// returns that record again. Fails with `ErrorKind::NotFound` if the
    /// cursor is no longer in the source.
    fn seek_cursor(&mut self, cursor: &str) -> Result<(), PluginError>;

    /// Human-readable catalog template for the record's message id.
    fn catalog(&mut self, _record: &RawRecord) -> Result<Option<String>, PluginError> {
        Ok(None)
    }
}
