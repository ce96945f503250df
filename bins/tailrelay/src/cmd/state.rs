use std::fmt::Write;

use pipeline::checkpoint::load_checkpoint;
use pipeline::{PendingMap, PendingStore};

use crate::config::{RelayConfig, StateArgs};
use crate::error::RelayError;

/// Print the saved resume cursor and what is still awaiting acknowledgment.
pub fn run(args: StateArgs) -> Result<(), RelayError> {
    let config = RelayConfig::load(&args.config)?;
    let input = &config.pipeline.input;

    let cursor = load_checkpoint(&input.cursor_state_file);
    let pending = PendingStore::new(&config.pipeline.pending_queue.file).load();
    print!("{}", render(cursor.as_deref(), &pending, args.verbose));
    Ok(())
}

fn render(cursor: Option<&str>, pending: &PendingMap, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "cursor: {}", cursor.unwrap_or("<none>"));
    let _ = writeln!(out, "pending: {}", pending.len());
    for (cursor, body) in pending {
        if verbose {
            let body = serde_json::to_string(body).unwrap_or_default();
            let _ = writeln!(out, "  {cursor} {body}");
        } else {
            let _ = writeln!(out, "  {cursor}");
        }
    }
    out
}
