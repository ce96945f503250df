use relay_api::PluginError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(String),

    #[error("seek to {position}: {source}")]
    Seek {
        position: &'static str,
        source: PluginError,
    },

    /// Resuming from the saved cursor failed and `cursor_seek_fallback` is `none`.
    #[error("cannot resume from cursor ({reason}) and no fallback is configured")]
    ResumeFailed { reason: String },

    #[error("source read: {0}")]
    SourceRead(PluginError),

    #[error("task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
