// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

/// Path that selects standard output.
pub(crate) const STDOUT: &str = "-";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct JsonlSinkConfig {
    /// Output file, appended to; `-` writes to stdout.
    #[serde(default = "default_path")]
    pub path: String,
    /// Records queued for the writer before `dispatch` waits.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for JsonlSinkConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            buffer: default_buffer(),
        }
    }
}

fn default_path() -> String {
    STDOUT.into()
}
fn default_buffer() -> usize {
    1024
}
