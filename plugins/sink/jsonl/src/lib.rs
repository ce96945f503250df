//! Delivery sink writing each record as one JSON line to a file or stdout.

mod config;
mod sink;

pub use config::JsonlSinkConfig;
pub use sink::JsonlSink;
