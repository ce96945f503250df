use serde_json::{Map, Value};

use relay_api::{FIELD_CURSOR, FieldValue, PluginError, RawRecord};

const FIELD_REALTIME_TIMESTAMP: &str = "__REALTIME_TIMESTAMP";

/// Parse one `journalctl -o json` line.
///
/// Strings are text, arrays of numbers are binary payloads and any other
/// array is a field repeated within the entry. `null` (field too large to
/// export) is dropped.
pub(crate) fn parse_entry(line: &[u8]) -> Result<RawRecord, PluginError> {
    let object: Map<String, Value> = serde_json::from_slice(line)
        .map_err(|e| PluginError::format_err(format!("entry json: {e}")))?;

    let cursor = match object.get(FIELD_CURSOR) {
        Some(Value::String(cursor)) if !cursor.is_empty() => cursor.clone(),
        _ => return Err(PluginError::format_err("entry without __CURSOR")),
    };
    let realtime = match object.get(FIELD_REALTIME_TIMESTAMP) {
        Some(Value::String(ts)) => ts.parse::<u64>().ok(),
        Some(Value::Number(ts)) => ts.as_u64(),
        _ => None,
    }
    .ok_or_else(|| PluginError::format_err(format!("entry {cursor}: bad __REALTIME_TIMESTAMP")))?;

    let mut record = RawRecord::new(cursor, realtime);
    for (name, value) in object {
        if let Some(value) = field_value(value) {
            record.fields.insert(name, value);
        }
    }
    Ok(record)
}

/// Only the cursor of a line, without building the record.
pub(crate) fn entry_cursor(line: &[u8]) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct CursorOnly {
        #[serde(rename = "__CURSOR")]
        cursor: Option<String>,
    }
    serde_json::from_slice::<CursorOnly>(line).ok()?.cursor
}

fn field_value(value: Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(FieldValue::Text(text)),
        Value::Array(items) if items.iter().all(Value::is_number) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            bytes.map(FieldValue::from_bytes)
        }
        Value::Array(items) => {
            let values: Vec<FieldValue> = items.into_iter().filter_map(field_value).collect();
            Some(FieldValue::Multi(values))
        }
        other => Some(FieldValue::Text(other.to_string())),
    }
}
