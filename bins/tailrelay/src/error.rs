#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("plugin: {0}")]
    Plugin(#[from] relay_api::PluginError),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
