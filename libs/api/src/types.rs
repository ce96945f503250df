use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the free-text message field in a raw record.
pub const FIELD_MESSAGE: &str = "MESSAGE";
/// Name of the catalog message id field.
pub const FIELD_MESSAGE_ID: &str = "MESSAGE_ID";
/// Field the follower attaches when a catalog template was found.
pub const FIELD_CATALOG_ENTRY: &str = "CATALOG_ENTRY";
/// Raw field name under which the source cursor travels in an output record.
pub const FIELD_CURSOR: &str = "__CURSOR";

// ════════════════════════════════════════════════════════════════
//  RawRecord
// ════════════════════════════════════════════════════════════════

/// Value of a single raw field.
///
/// A field repeated within one record becomes `Multi` with the values in
/// source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Not valid UTF-8.
    Bytes(Vec<u8>),
    Multi(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Build from raw bytes: valid UTF-8 becomes `Text`, anything else `Bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(s) => FieldValue::Text(s),
            Err(e) => FieldValue::Bytes(e.into_bytes()),
        }
    }

    /// Append another occurrence of the same field.
    pub fn push(self, next: FieldValue) -> Self {
        match self {
            FieldValue::Multi(mut values) => {
                values.push(next);
                FieldValue::Multi(values)
            }
            single => FieldValue::Multi(vec![single, next]),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// One record read from the log source. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub fields: BTreeMap<String, FieldValue>,
    /// Opaque, source-assigned position of this record.
    pub cursor: String,
    /// Microseconds since the Unix epoch.
    pub realtime_timestamp: u64,
}

impl RawRecord {
    pub fn new(cursor: impl Into<String>, realtime_timestamp: u64) -> Self {
        Self {
            fields: BTreeMap::new(),
            cursor: cursor.into(),
            realtime_timestamp,
        }
    }

    /// Builder-style field insert; a repeated name turns into `Multi`.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.add_field(name, value.into());
        self
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        let merged = match self.fields.remove(&name) {
            Some(existing) => existing.push(value),
            None => value,
        };
        self.fields.insert(name, merged);
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text of the `MESSAGE` field, if it is a single UTF-8 value.
    pub fn message(&self) -> Option<&str> {
        self.field(FIELD_MESSAGE).and_then(FieldValue::as_text)
    }
}

// ════════════════════════════════════════════════════════════════
//  OutputRecord
// ════════════════════════════════════════════════════════════════

/// Normalized record handed to the delivery sink.
///
/// A JSON object: scalars are bool, unsigned/signed integers, floats and
/// strings; nested objects come from metadata relocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRecord(Map<String, Value>);

impl OutputRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for OutputRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A record dispatched to the sink and not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReference {
    pub cursor: String,
    pub body: OutputRecord,
}

impl PendingReference {
    pub fn new(cursor: impl Into<String>, body: OutputRecord) -> Self {
        Self { cursor: cursor.into(), body }
    }
}

// ════════════════════════════════════════════════════════════════
//  Wait outcome
// ════════════════════════════════════════════════════════════════

/// Why a blocking wait on the source returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Timeout elapsed without changes.
    Unchanged,
    /// New records were appended.
    Appended,
    /// Source files were added, removed or rotated.
    Invalidated,
}
