pub mod checkpoint;
pub mod config;
pub mod continuation;
pub mod error;
pub mod persist;
pub mod position;
pub mod relay;
pub mod source;
pub mod tracker;
pub mod transform;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    ContinuationConfig, InputConfig, PendingQueueConfig, PipelineConfig, SeekFallback,
    StartPosition,
};
pub use error::PipelineError;
pub use relay::{RelayReport, run_relay};
pub use sink::DispatchStats;
pub use tracker::{PendingMap, PendingStore};
