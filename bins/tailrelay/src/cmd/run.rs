use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pipeline::run_relay;
use relay_sink_jsonl::JsonlSink;
use relay_source_journal_json::JournalJsonSource;

use crate::config::{RelayConfig, RunArgs};
use crate::error::RelayError;

pub async fn run(args: RunArgs) -> Result<(), RelayError> {
    tracing::info!("tailrelay starting");

    // --- Load config ---
    let config = RelayConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- Source and sink ---
    let source = JournalJsonSource::open(config.source.clone())?;
    let sink = Arc::new(JsonlSink::open(&config.sink)?);

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(token.clone()));

    let result = run_relay(Box::new(source), sink, &config.pipeline, token.clone()).await;
    signals.abort();

    let report = result?;
    tracing::info!(
        started_at = ?report.started_at,
        replayed = report.dispatch.replayed,
        dispatched = report.dispatch.dispatched,
        rejected = report.dispatch.rejected,
        pending = report.tracker.remaining,
        checkpoint = ?report.checkpoint,
        "tailrelay stopped"
    );
    Ok(())
}

/// Cancel `token` on Ctrl-C or, on unix, SIGTERM.
async fn cancel_on_signal(token: CancellationToken) -> Result<(), RelayError> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down...");
    token.cancel();
    Ok(())
}
