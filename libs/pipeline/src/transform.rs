use serde_json::{Map, Number, Value};

use relay_api::{FIELD_CURSOR, FIELD_MESSAGE, FieldValue, OutputRecord, RawRecord, format_rfc3339_micros};

use crate::config::InputConfig;

/// Output key of the event timestamp.
pub const KEY_TIMESTAMP: &str = "@timestamp";
/// Output key of the raw microsecond timestamp.
pub const KEY_REALTIME_TIMESTAMP: &str = "@realtime_timestamp";
pub const KEY_TYPE: &str = "type";
pub const KEY_FIELDS: &str = "fields";

const PRIORITY_NAMES: [&str; 8] = [
    "emergency",
    "alert",
    "critical",
    "error",
    "warning",
    "notice",
    "informational",
    "debug",
];

const FACILITY_NAMES: [&str; 24] = [
    "kernel",
    "user",
    "mail",
    "daemon",
    "auth",
    "syslog",
    "lpr",
    "news",
    "uucp",
    "cron",
    "authpriv",
    "ftp",
    "ntp",
    "security",
    "console",
    "solaris-cron",
    "local0",
    "local1",
    "local2",
    "local3",
    "local4",
    "local5",
    "local6",
    "local7",
];

// ═══════════════════════════════════════════════════════════════
//  Options
// ═══════════════════════════════════════════════════════════════

/// How a raw record is normalized. Built once from `[input]`.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub clean_keys: bool,
    pub convert_scalars: bool,
    /// Path segments of the metadata container; empty keeps metadata at the top.
    pub relocate_metadata: Vec<String>,
    pub default_type: String,
    pub parse_priority: bool,
    pub parse_facility: bool,
    pub extra_fields: Map<String, Value>,
}

impl From<&InputConfig> for TransformOptions {
    fn from(cfg: &InputConfig) -> Self {
        let relocate_metadata = if cfg.move_metadata_to_field.is_empty() {
            Vec::new()
        } else {
            cfg.move_metadata_to_field.split('.').map(str::to_string).collect()
        };
        Self {
            clean_keys: cfg.clean_field_names,
            convert_scalars: cfg.convert_to_numbers,
            relocate_metadata,
            default_type: cfg.default_type.clone(),
            parse_priority: cfg.parse_priority,
            parse_facility: cfg.parse_facility,
            extra_fields: cfg.fields.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Transform
// ═══════════════════════════════════════════════════════════════

/// Normalize a raw record into the object handed to the sink.
///
/// The message stays at the top level; every other field (the cursor
/// included) goes to the metadata container when relocation is on. Fields
/// are visited in name order, so when two raw names clean to the same key
/// the later name wins, `MESSAGE` included.
pub fn transform(raw: &RawRecord, opts: &TransformOptions) -> OutputRecord {
    let flat = opts.relocate_metadata.is_empty();
    let mut top = Map::new();
    let mut meta = Map::new();

    for (name, value) in &raw.fields {
        let key = output_key(name, opts.clean_keys);
        let value = convert_field(name, value, opts);
        if flat || name == FIELD_MESSAGE {
            top.insert(key, value);
        } else {
            meta.insert(key, value);
        }
    }
    if !raw.fields.contains_key(FIELD_CURSOR) {
        let target = if flat { &mut top } else { &mut meta };
        target.insert(
            output_key(FIELD_CURSOR, opts.clean_keys),
            Value::String(raw.cursor.clone()),
        );
    }

    if let Some((key, container)) = nest(meta, &opts.relocate_metadata) {
        top.insert(key, container);
    }

    if !matches!(top.get(KEY_TYPE), Some(Value::String(_))) {
        top.insert(KEY_TYPE.into(), Value::String(opts.default_type.clone()));
    }
    top.insert(
        KEY_TIMESTAMP.into(),
        Value::String(format_rfc3339_micros(raw.realtime_timestamp)),
    );
    top.insert(KEY_REALTIME_TIMESTAMP.into(), Value::from(raw.realtime_timestamp));
    if !opts.extra_fields.is_empty() {
        top.insert(KEY_FIELDS.into(), Value::Object(opts.extra_fields.clone()));
    }

    OutputRecord::from(top)
}

/// Lowercase and strip leading underscores when cleaning is on.
pub fn output_key(name: &str, clean: bool) -> String {
    if clean {
        name.to_lowercase().trim_start_matches('_').to_string()
    } else {
        name.to_string()
    }
}

fn convert_field(name: &str, value: &FieldValue, opts: &TransformOptions) -> Value {
    let canonical = output_key(name, true);
    if opts.parse_priority && canonical == "priority" {
        if let Some(label) = symbolic(value, &PRIORITY_NAMES) {
            return Value::String(label.into());
        }
    }
    if opts.parse_facility && canonical == "syslog_facility" {
        if let Some(label) = symbolic(value, &FACILITY_NAMES) {
            return Value::String(label.into());
        }
    }
    convert_value(value, opts.convert_scalars)
}

/// Name for a numeric code; codes outside the table are left alone.
fn symbolic(value: &FieldValue, names: &[&'static str]) -> Option<&'static str> {
    let code: usize = value.as_text()?.trim().parse().ok()?;
    names.get(code).copied()
}

fn convert_value(value: &FieldValue, convert: bool) -> Value {
    match value {
        FieldValue::Text(text) if convert => parse_scalar(text),
        FieldValue::Text(text) => Value::String(text.clone()),
        FieldValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        FieldValue::Multi(values) => {
            Value::Array(values.iter().map(|v| convert_value(v, convert)).collect())
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scalar conversion
// ═══════════════════════════════════════════════════════════════

type ScalarParser = fn(&str) -> Option<Value>;

/// Tried in order; the first parser that accepts the text wins.
const SCALAR_PARSERS: [ScalarParser; 4] = [parse_bool, parse_unsigned, parse_signed, parse_float];

/// Typed value for `text`, or the text itself when no parser accepts it.
pub fn parse_scalar(text: &str) -> Value {
    SCALAR_PARSERS
        .iter()
        .find_map(|parse| parse(text))
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn parse_bool(text: &str) -> Option<Value> {
    match text {
        "true" | "TRUE" | "True" => Some(Value::Bool(true)),
        "false" | "FALSE" | "False" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn parse_unsigned(text: &str) -> Option<Value> {
    if text.starts_with('+') {
        return None;
    }
    text.parse::<u64>().ok().map(Value::from)
}

fn parse_signed(text: &str) -> Option<Value> {
    text.parse::<i64>().ok().map(Value::from)
}

/// Finite floats only; `NaN` and infinities stay strings.
fn parse_float(text: &str) -> Option<Value> {
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

// ═══════════════════════════════════════════════════════════════
//  Relocation
// ═══════════════════════════════════════════════════════════════

/// Wrap `meta` in one object per path segment; returns the top-level key
/// and the container under it, or `None` for an empty path.
fn nest(meta: Map<String, Value>, path: &[String]) -> Option<(String, Value)> {
    let (first, rest) = path.split_first()?;
    let container = rest.iter().rev().fold(Value::Object(meta), |inner, segment| {
        let mut wrapper = Map::new();
        wrapper.insert(segment.clone(), inner);
        Value::Object(wrapper)
    });
    Some((first.clone(), container))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TS: u64 = 951_827_696_789_012;

    fn sample() -> RawRecord {
        RawRecord::new("s=1;i=10", TS)
            .with_field("MESSAGE", "disk full")
            .with_field("PRIORITY", "3")
            .with_field("SYSLOG_FACILITY", "4")
            .with_field("_PID", "812")
            .with_field("_SYSTEMD_UNIT", "storage.service")
            .with_field("__CURSOR", "s=1;i=10")
    }

    fn options() -> TransformOptions {
        TransformOptions {
            default_type: "journal".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_keep_raw_names_and_text() {
        let out = transform(&sample(), &options());
        assert_eq!(out.get("MESSAGE"), Some(&json!("disk full")));
        assert_eq!(out.get("_PID"), Some(&json!("812")));
        assert_eq!(out.get("__CURSOR"), Some(&json!("s=1;i=10")));
        assert_eq!(out.get("type"), Some(&json!("journal")));
        assert_eq!(out.get("@timestamp"), Some(&json!("2000-02-29T12:34:56.789012Z")));
        assert_eq!(out.get("@realtime_timestamp"), Some(&json!(TS)));
        assert!(!out.contains_key("fields"));
    }

    #[test]
    fn cleans_and_converts() {
        let opts = TransformOptions {
            clean_keys: true,
            convert_scalars: true,
            ..options()
        };
        let out = transform(&sample(), &opts);
        assert_eq!(out.get("message"), Some(&json!("disk full")));
        assert_eq!(out.get("pid"), Some(&json!(812u64)));
        assert_eq!(out.get("priority"), Some(&json!(3u64)));
        assert_eq!(out.get("systemd_unit"), Some(&json!("storage.service")));
        assert_eq!(out.get("cursor"), Some(&json!("s=1;i=10")));
        assert!(!out.contains_key("_PID"));
    }

    #[test]
    fn scalar_conversion_order() {
        assert_eq!(parse_scalar("true"), json!(true));
        assert_eq!(parse_scalar("False"), json!(false));
        assert_eq!(parse_scalar("tRuE"), json!("tRuE"));
        assert_eq!(parse_scalar("18446744073709551615"), json!(u64::MAX));
        assert_eq!(parse_scalar("-42"), json!(-42));
        assert_eq!(parse_scalar("4.25"), json!(4.25));
        assert_eq!(parse_scalar("1e3"), json!(1000.0));
        assert_eq!(parse_scalar("NaN"), json!("NaN"));
        assert_eq!(parse_scalar("inf"), json!("inf"));
        assert_eq!(parse_scalar(""), json!(""));
        assert_eq!(parse_scalar("12abc"), json!("12abc"));
        assert!(parse_scalar("+5").is_i64());
    }

    #[test]
    fn no_conversion_without_flag() {
        let raw = RawRecord::new("c", 0)
            .with_field("FLAG", "true")
            .with_field("COUNT", "42");
        let out = transform(&raw, &options());
        assert_eq!(out.get("FLAG"), Some(&json!("true")));
        assert_eq!(out.get("COUNT"), Some(&json!("42")));
    }

    #[test]
    fn relocates_metadata_under_path() {
        let opts = TransformOptions {
            clean_keys: true,
            relocate_metadata: vec!["journal".into(), "meta".into()],
            ..options()
        };
        let out = transform(&sample(), &opts);

        assert_eq!(out.get("message"), Some(&json!("disk full")));
        assert!(!out.contains_key("pid"));
        let meta = &out.get("journal").unwrap()["meta"];
        assert_eq!(meta["pid"], json!("812"));
        assert_eq!(meta["cursor"], json!("s=1;i=10"));
        assert_eq!(out.get("type"), Some(&json!("journal")));
    }

    #[test]
    fn relocation_keeps_message_without_cleaning() {
        let opts = TransformOptions {
            relocate_metadata: vec!["meta".into()],
            ..options()
        };
        let out = transform(&sample(), &opts);
        assert_eq!(out.get("MESSAGE"), Some(&json!("disk full")));
        assert_eq!(out.get("meta").unwrap()["_PID"], json!("812"));
    }

    #[test]
    fn record_type_is_kept_when_textual() {
        let raw = RawRecord::new("c", 0).with_field("TYPE", "audit");
        let opts = TransformOptions {
            clean_keys: true,
            ..options()
        };
        assert_eq!(transform(&raw, &opts).get("type"), Some(&json!("audit")));

        let raw = RawRecord::new("c", 0).with_field("TYPE", "7");
        let opts = TransformOptions {
            clean_keys: true,
            convert_scalars: true,
            ..options()
        };
        assert_eq!(transform(&raw, &opts).get("type"), Some(&json!("journal")));
    }

    #[test]
    fn symbolic_priority_and_facility() {
        let opts = TransformOptions {
            clean_keys: true,
            convert_scalars: true,
            parse_priority: true,
            parse_facility: true,
            ..options()
        };
        let out = transform(&sample(), &opts);
        assert_eq!(out.get("priority"), Some(&json!("error")));
        assert_eq!(out.get("syslog_facility"), Some(&json!("auth")));

        let raw = RawRecord::new("c", 0).with_field("PRIORITY", "9");
        assert_eq!(transform(&raw, &opts).get("priority"), Some(&json!(9u64)));
    }

    #[test]
    fn cursor_added_when_missing() {
        let raw = RawRecord::new("s=9;i=1", 0).with_field("MESSAGE", "hi");
        let out = transform(&raw, &options());
        assert_eq!(out.get("__CURSOR"), Some(&json!("s=9;i=1")));
    }

    #[test]
    fn colliding_keys_resolve_by_name_order() {
        let raw = RawRecord::new("c", 0)
            .with_field("_HOSTNAME", "from-trusted")
            .with_field("HOSTNAME", "from-user");
        let opts = TransformOptions {
            clean_keys: true,
            ..options()
        };
        // "HOSTNAME" sorts before "_HOSTNAME"
        assert_eq!(transform(&raw, &opts).get("hostname"), Some(&json!("from-trusted")));
    }

    #[test]
    fn message_collision_follows_name_order() {
        let raw = RawRecord::new("c", 0)
            .with_field("MESSAGE", "journal message")
            .with_field("message", "user field");
        let flat = TransformOptions {
            clean_keys: true,
            ..options()
        };
        // "MESSAGE" sorts before "message"
        assert_eq!(transform(&raw, &flat).get("message"), Some(&json!("user field")));

        let nested = TransformOptions {
            clean_keys: true,
            relocate_metadata: vec!["meta".into()],
            ..options()
        };
        let out = transform(&raw, &nested);
        assert_eq!(out.get("message"), Some(&json!("journal message")));
        assert_eq!(out.get("meta").unwrap()["message"], json!("user field"));
    }

    #[test]
    fn bytes_and_repeated_fields() {
        let raw = RawRecord::new("c", 0)
            .with_field("BLOB", FieldValue::Bytes(vec![b'o', b'k', 0xff]))
            .with_field("TAG", "a")
            .with_field("TAG", "7");
        let opts = TransformOptions {
            convert_scalars: true,
            ..options()
        };
        let out = transform(&raw, &opts);
        assert_eq!(out.get("BLOB"), Some(&json!("ok\u{fffd}")));
        assert_eq!(out.get("TAG"), Some(&json!(["a", 7u64])));
    }

    #[test]
    fn extra_fields_attached() {
        let mut extra = Map::new();
        extra.insert("env".into(), json!("prod"));
        let opts = TransformOptions {
            extra_fields: extra,
            ..options()
        };
        let out = transform(&sample(), &opts);
        assert_eq!(out.get("fields"), Some(&json!({"env": "prod"})));
    }

    #[test]
    fn options_from_input_config() {
        let cfg = InputConfig {
            clean_field_names: true,
            move_metadata_to_field: "a.b".into(),
            ..Default::default()
        };
        let opts = TransformOptions::from(&cfg);
        assert!(opts.clean_keys);
        assert_eq!(opts.relocate_metadata, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(opts.default_type, "journal");
    }
}
