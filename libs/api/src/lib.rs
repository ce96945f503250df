//! Data model and collaborator interfaces shared by the relay pipeline and
//! its source/sink plugins.

pub mod error;
pub mod sink;
pub mod source;
pub mod types;
mod util;

pub use error::{ErrorKind, PluginError};
pub use sink::{AckHandle, DeliverySink, Outcome};
pub use source::LogSource;
pub use types::{
    FieldValue, OutputRecord, PendingReference, RawRecord, WaitOutcome,
    FIELD_CATALOG_ENTRY, FIELD_CURSOR, FIELD_MESSAGE, FIELD_MESSAGE_ID,
};
pub use util::format_rfc3339_micros;
