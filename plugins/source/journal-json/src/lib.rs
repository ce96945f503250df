//! Log source over a file of journal entries in `journalctl -o json` form,
//! one JSON object per line.

mod catalog;
mod config;
mod entry;
mod reader;

pub use catalog::Catalog;
pub use config::JournalJsonConfig;
pub use reader::JournalJsonSource;
