use std::path::PathBuf;
use std::time::Duration;

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, serde::Deserialize)]
pub struct JournalJsonConfig {
    /// File with one journal entry per line.
    pub path: PathBuf,
    /// Only entries of these systemd units; empty reads everything.
    #[serde(default)]
    pub units: Vec<String>,
    /// With `units` set, also pass kernel messages.
    #[serde(default)]
    pub kernel: bool,
    /// Message catalog in journald's `.catalog` format.
    #[serde(default)]
    pub catalog_file: Option<PathBuf>,
    /// How often a waiting reader checks the file for growth.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl JournalJsonConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            units: Vec::new(),
            kernel: false,
            catalog_file: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_poll_interval_ms() -> u64 {
    10
}
