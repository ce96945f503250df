use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use relay_api::{FIELD_MESSAGE_ID, FieldValue, LogSource, PluginError, RawRecord, WaitOutcome};

use crate::catalog::Catalog;
use crate::config::JournalJsonConfig;
use crate::entry::{entry_cursor, parse_entry};

const FIELD_SYSTEMD_UNIT: &str = "_SYSTEMD_UNIT";
const FIELD_TRANSPORT: &str = "_TRANSPORT";

// ════════════════════════════════════════════════════════════════
//  JournalJsonSource
// ════════════════════════════════════════════════════════════════

/// Follows a growing file of exported journal entries.
///
/// Only complete lines are consumed; a trailing partial line is read again
/// once it is finished. A file that shrinks below the read position is
/// treated as rotated and read again from the start.
pub struct JournalJsonSource {
    path: PathBuf,
    reader: BufReader<File>,
    /// Byte offset of the first unread line.
    offset: u64,
    /// File length observed when reading last ran out of complete lines.
    seen_len: u64,
    units: Vec<String>,
    kernel: bool,
    catalog: Catalog,
    poll_interval: Duration,
}

impl JournalJsonSource {
    /// Open the file positioned at its head.
    pub fn open(config: JournalJsonConfig) -> Result<Self, PluginError> {
        let file = File::open(&config.path)
            .map_err(|e| PluginError::io(format!("open {}: {e}", config.path.display())))?;
        let catalog = match &config.catalog_file {
            Some(path) => Catalog::load(path)?,
            None => Catalog::default(),
        };
        tracing::info!(
            path = %config.path.display(),
            units = ?config.units,
            kernel = config.kernel,
            "journal file opened"
        );
        Ok(Self {
            poll_interval: config.poll_interval(),
            path: config.path,
            reader: BufReader::new(file),
            offset: 0,
            seen_len: 0,
            units: config.units,
            kernel: config.kernel,
            catalog,
        })
    }

    fn reposition(&mut self, offset: u64) -> Result<(), PluginError> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| PluginError::io(format!("seek: {e}")))?;
        self.offset = offset;
        self.seen_len = offset;
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), PluginError> {
        let file = File::open(&self.path)
            .map_err(|e| PluginError::io(format!("reopen {}: {e}", self.path.display())))?;
        self.reader = BufReader::new(file);
        self.offset = 0;
        self.seen_len = 0;
        Ok(())
    }

    /// Next complete line without its terminator.
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, PluginError> {
        let mut line = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut line)
            .map_err(|e| PluginError::io(format!("read: {e}")))?;
        if n == 0 {
            self.seen_len = self.offset;
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            // Partial line: leave it for the writer to finish.
            self.seen_len = self.offset + n as u64;
            self.reader
                .seek(SeekFrom::Start(self.offset))
                .map_err(|e| PluginError::io(format!("seek: {e}")))?;
            return Ok(None);
        }
        self.offset += n as u64;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn passes_filter(&self, record: &RawRecord) -> bool {
        if self.units.is_empty() {
            return true;
        }
        let text = |name: &str| record.field(name).and_then(FieldValue::as_text);
        if let Some(unit) = text(FIELD_SYSTEMD_UNIT) {
            if self.units.iter().any(|u| u == unit) {
                return true;
            }
        }
        self.kernel && text(FIELD_TRANSPORT) == Some("kernel")
    }
}

impl LogSource for JournalJsonSource {
    fn next_record(&mut self) -> Result<Option<RawRecord>, PluginError> {
        loop {
            let start = self.offset;
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record = match parse_entry(&line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(offset = start, error = %e, "bad journal entry, skipping");
                    continue;
                }
            };
            if self.passes_filter(&record) {
                return Ok(Some(record));
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, PluginError> {
        let deadline = Instant::now() + timeout;
        loop {
            let len = std::fs::metadata(&self.path)
                .map_err(|e| PluginError::io(format!("stat {}: {e}", self.path.display())))?
                .len();
            if len < self.offset {
                tracing::info!(path = %self.path.display(), "journal file shrank, reading from the start");
                self.reopen()?;
                return Ok(WaitOutcome::Invalidated);
            }
            if len > self.seen_len {
                return Ok(WaitOutcome::Appended);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::Unchanged);
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn seek_head(&mut self) -> Result<(), PluginError> {
        self.reposition(0)
    }

    fn seek_tail(&mut self) -> Result<(), PluginError> {
        let end = last_line_end(self.reader.get_mut())?;
        self.reposition(end)
    }

    fn seek_cursor(&mut self, cursor: &str) -> Result<(), PluginError> {
        self.reposition(0)?;
        loop {
            let start = self.offset;
            let Some(line) = self.read_line()? else {
                break;
            };
            if entry_cursor(&line).as_deref() == Some(cursor) {
                return self.reposition(start);
            }
        }
        Err(PluginError::not_found(format!(
            "cursor {cursor} not in {}",
            self.path.display()
        )))
    }

    fn catalog(&mut self, record: &RawRecord) -> Result<Option<String>, PluginError> {
        if self.catalog.is_empty() {
            return Ok(None);
        }
        Ok(record
            .field(FIELD_MESSAGE_ID)
            .and_then(FieldValue::as_text)
            .and_then(|id| self.catalog.render(id, record)))
    }
}

/// Offset just past the last newline, so reading starts at a line boundary.
fn last_line_end(f: &mut File) -> Result<u64, PluginError> {
    let len = f
        .seek(SeekFrom::End(0))
        .map_err(|e| PluginError::io(format!("seek: {e}")))?;
    let mut pos = len;
    let mut chunk = [0u8; 4096];
    while pos > 0 {
        let size = pos.min(chunk.len() as u64) as usize;
        pos -= size as u64;
        f.seek(SeekFrom::Start(pos))
            .map_err(|e| PluginError::io(format!("seek: {e}")))?;
        f.read_exact(&mut chunk[..size])
            .map_err(|e| PluginError::io(format!("read: {e}")))?;
        if let Some(i) = chunk[..size].iter().rposition(|&b| b == b'\n') {
            return Ok(pos + i as u64 + 1);
        }
    }
    Ok(0)
}
