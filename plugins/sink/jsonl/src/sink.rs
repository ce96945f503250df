use std::future::Future;
use std::io::{BufWriter, Write};
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use relay_api::{AckHandle, DeliverySink, OutputRecord, PluginError};

use crate::config::{JsonlSinkConfig, STDOUT};

type Job = (OutputRecord, AckHandle);

// ════════════════════════════════════════════════════════════════
//  JsonlSink
// ════════════════════════════════════════════════════════════════

/// Appends records as JSON lines from a dedicated writer thread.
///
/// A record is acknowledged once its line is written and flushed; a write
/// error fails the record, leaving it pending.
pub struct JsonlSink {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlSink {
    /// Open the output and start the writer. Must be called inside a tokio runtime.
    pub fn open(config: &JsonlSinkConfig) -> Result<Self, PluginError> {
        let out: Box<dyn Write + Send> = if config.path == STDOUT {
            Box::new(std::io::stdout())
        } else {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)
                .map_err(|e| PluginError::io(format!("open {}: {e}", config.path)))?;
            Box::new(file)
        };

        let (tx, rx) = mpsc::channel::<Job>(config.buffer.max(1));
        let name = config.path.clone();
        let writer = tokio::task::spawn_blocking(move || write_loop(&name, out, rx));
        tracing::info!(path = %config.path, "jsonl sink opened");

        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.jobs.lock().ok()?.clone()
    }
}

fn write_loop(name: &str, out: Box<dyn Write + Send>, mut jobs: mpsc::Receiver<Job>) {
    let mut out = BufWriter::new(out);
    let mut written = 0u64;
    while let Some((record, ack)) = jobs.blocking_recv() {
        match write_line(&mut out, &record) {
            Ok(()) => {
                written += 1;
                ack.ack();
            }
            Err(e) => {
                tracing::error!(sink = %name, cursor = %ack.cursor(), error = %e, "write error");
                ack.fail(e.to_string());
            }
        }
    }
    if let Err(e) = out.flush() {
        tracing::error!(sink = %name, error = %e, "jsonl sink final flush failed");
    }
    tracing::info!(sink = %name, written, "jsonl sink finished");
}

fn write_line(out: &mut impl Write, record: &OutputRecord) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    out.flush()
}

impl DeliverySink for JsonlSink {
    fn dispatch(
        &self,
        record: OutputRecord,
        ack: AckHandle,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let jobs = self.sender();
        Box::pin(async move {
            match jobs {
                Some(jobs) => jobs.send((record, ack)).await.is_ok(),
                None => false,
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let jobs = self.jobs.lock().ok().and_then(|mut jobs| jobs.take());
        let writer = self.writer.lock().ok().and_then(|mut writer| writer.take());
        Box::pin(async move {
            drop(jobs);
            if let Some(writer) = writer {
                if let Err(e) = writer.await {
                    tracing::error!(error = %e, "jsonl writer panicked");
                }
            }
        })
    }
}
