use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

// ═══════════════════════════════════════════════════════════════
//  Start position
// ═══════════════════════════════════════════════════════════════

/// Where reading starts when the relay comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// Resume right at the cursor saved in `cursor_state_file`.
    Cursor,
    Head,
    Tail,
}

/// What to do when resuming from the saved cursor is impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekFallback {
    /// Refuse to start.
    None,
    Head,
    Tail,
}

// ═══════════════════════════════════════════════════════════════
//  Input Config
// ═══════════════════════════════════════════════════════════════

/// `[input]`: positioning, cursor checkpointing and record normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_seek_position")]
    pub seek_position: StartPosition,
    #[serde(default = "default_cursor_seek_fallback")]
    pub cursor_seek_fallback: SeekFallback,

    /// Persist the resume cursor periodically and on shutdown.
    #[serde(default)]
    pub write_cursor_state: bool,
    #[serde(default = "default_cursor_state_file")]
    pub cursor_state_file: PathBuf,
    #[serde(default = "default_cursor_flush_period_ms")]
    pub cursor_flush_period_ms: u64,

    // --- Normalization ---
    /// Lowercase field names and strip leading underscores.
    #[serde(default)]
    pub clean_field_names: bool,
    /// Turn textual booleans and numbers into typed JSON values.
    #[serde(default)]
    pub convert_to_numbers: bool,
    /// Dot-separated path for every non-message field; empty keeps them top level.
    #[serde(default)]
    pub move_metadata_to_field: String,
    #[serde(default = "default_type")]
    pub default_type: String,
    #[serde(default)]
    pub parse_priority: bool,
    #[serde(default)]
    pub parse_facility: bool,
    /// Constant fields attached under `fields` to every record.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl InputConfig {
    pub fn cursor_flush_period(&self) -> Duration {
        Duration::from_millis(self.cursor_flush_period_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cursor_flush_period_ms == 0 {
            return Err("input: cursor_flush_period_ms must be greater than zero".into());
        }
        if self.write_cursor_state && self.cursor_state_file.as_os_str().is_empty() {
            return Err("input: cursor_state_file must not be empty".into());
        }
        let path = &self.move_metadata_to_field;
        if !path.is_empty() && path.split('.').any(str::is_empty) {
            return Err(format!(
                "input: move_metadata_to_field '{path}' contains an empty path segment"
            ));
        }
        Ok(())
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            seek_position: default_seek_position(),
            cursor_seek_fallback: default_cursor_seek_fallback(),
            write_cursor_state: false,
            cursor_state_file: default_cursor_state_file(),
            cursor_flush_period_ms: default_cursor_flush_period_ms(),
            clean_field_names: false,
            convert_to_numbers: false,
            move_metadata_to_field: String::new(),
            default_type: default_type(),
            parse_priority: false,
            parse_facility: false,
            fields: Map::new(),
        }
    }
}

fn default_seek_position() -> StartPosition {
    StartPosition::Tail
}
fn default_cursor_seek_fallback() -> SeekFallback {
    SeekFallback::Tail
}
fn default_cursor_state_file() -> PathBuf {
    ".tailrelay-cursor-state".into()
}
fn default_cursor_flush_period_ms() -> u64 {
    5000
}
fn default_type() -> String {
    "journal".into()
}

// ═══════════════════════════════════════════════════════════════
//  Pending Queue Config
// ═══════════════════════════════════════════════════════════════

/// `[pending_queue]`: snapshot of dispatched but unacknowledged records.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingQueueConfig {
    #[serde(default = "default_pending_file")]
    pub file: PathBuf,
    #[serde(default = "default_pending_flush_period_ms")]
    pub flush_period_ms: u64,
    /// How long shutdown waits for outstanding acknowledgments.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl PendingQueueConfig {
    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.flush_period_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.file.as_os_str().is_empty() {
            return Err("pending_queue: file must not be empty".into());
        }
        if self.flush_period_ms == 0 {
            return Err("pending_queue: flush_period_ms must be greater than zero".into());
        }
        Ok(())
    }
}

impl Default for PendingQueueConfig {
    fn default() -> Self {
        Self {
            file: default_pending_file(),
            flush_period_ms: default_pending_flush_period_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_pending_file() -> PathBuf {
    ".tailrelay-pending-queue".into()
}
fn default_pending_flush_period_ms() -> u64 {
    1000
}
fn default_drain_timeout_ms() -> u64 {
    5000
}

// ═══════════════════════════════════════════════════════════════
//  Continuation Config
// ═══════════════════════════════════════════════════════════════

/// `[continuation]`: folding of indented continuation lines into the
/// preceding record of the same stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ContinuationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fields whose values identify a stream.
    #[serde(default = "default_stream_key_fields")]
    pub stream_key_fields: Vec<String>,
    /// A buffered record untouched for this long is released.
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl ContinuationConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.stream_key_fields.is_empty() {
            return Err("continuation: stream_key_fields must not be empty".into());
        }
        if self.sweep_interval_ms == 0 {
            return Err("continuation: sweep_interval_ms must be greater than zero".into());
        }
        Ok(())
    }
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stream_key_fields: default_stream_key_fields(),
            staleness_ms: default_staleness_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_stream_key_fields() -> Vec<String> {
    vec!["_SYSTEMD_UNIT".into()]
}
fn default_staleness_ms() -> u64 {
    30_000
}
fn default_sweep_interval_ms() -> u64 {
    1000
}

// ═══════════════════════════════════════════════════════════════
//  Pipeline Config
// ═══════════════════════════════════════════════════════════════

/// Everything the relay needs apart from the concrete source and sink.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub pending_queue: PendingQueueConfig,
    #[serde(default)]
    pub continuation: ContinuationConfig,
    /// Capacity of the bounded channels between stages.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.input.validate()?;
        self.pending_queue.validate()?;
        self.continuation.validate()?;
        if self.channel_buffer == 0 {
            return Err("channel_buffer must be greater than zero".into());
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            pending_queue: PendingQueueConfig::default(),
            continuation: ContinuationConfig::default(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

fn default_channel_buffer() -> usize {
    100
}
