use std::collections::HashMap;
use std::path::Path;

use relay_api::{FieldValue, PluginError, RawRecord};

// ════════════════════════════════════════════════════════════════
//  Catalog
// ════════════════════════════════════════════════════════════════

/// Message catalog: explanatory text per `MESSAGE_ID`.
///
/// Entries start with a `-- <id> [language]` header line; `#` lines are
/// comments. An entry without a language wins over localized ones.
/// `@FIELD@` in the text is replaced by that field of the record.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<String, String>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PluginError::io(format!("read catalog {}: {e}", path.display())))?;
        let catalog = Self::parse(&text);
        tracing::info!(path = %path.display(), entries = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn parse(text: &str) -> Self {
        let mut catalog = Self::default();
        let mut current: Option<(String, bool, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some((id, localized)) = parse_header(line) {
                if let Some(entry) = current.take() {
                    catalog.insert(entry);
                }
                current = Some((id, localized, Vec::new()));
            } else if line.starts_with('#') {
                continue;
            } else if let Some((_, _, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some(entry) = current.take() {
            catalog.insert(entry);
        }
        catalog
    }

    fn insert(&mut self, (id, localized, body): (String, bool, Vec<&str>)) {
        let start = body.iter().position(|l| !l.trim().is_empty()).unwrap_or(body.len());
        let end = body.iter().rposition(|l| !l.trim().is_empty()).map_or(start, |i| i + 1);
        let text = body[start..end].join("\n");
        if localized {
            self.entries.entry(id).or_insert(text);
        } else {
            self.entries.insert(id, text);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Catalog text for `message_id`, with fields of `record` substituted.
    pub fn render(&self, message_id: &str, record: &RawRecord) -> Option<String> {
        let template = self.entries.get(&message_id.trim().to_ascii_lowercase())?;
        Some(substitute(template, record))
    }
}

/// `-- 0027229ca0644181a76c4e92458afa2e [de]` → (id, localized)
fn parse_header(line: &str) -> Option<(String, bool)> {
    let mut parts = line.strip_prefix("-- ")?.split_whitespace();
    let id = parts.next()?;
    if id.len() != 32 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((id.to_ascii_lowercase(), parts.next().is_some()))
}

fn substitute(template: &str, record: &RawRecord) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('@') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('@') {
            Some(end) if is_field_name(&after[..end]) => {
                let name = &after[..end];
                match record.field(name).and_then(FieldValue::as_text) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('@');
                        out.push_str(name);
                        out.push('@');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('@');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}
