use relay_api::LogSource;

use crate::checkpoint::load_checkpoint;
use crate::config::{InputConfig, SeekFallback, StartPosition};
use crate::error::PipelineError;

/// Where the source ended up before following started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartedAt {
    Cursor(String),
    Head,
    Tail,
}

/// Position `source` according to `[input]`.
///
/// With `seek_position = "cursor"` the saved cursor is tried first; if it
/// is missing or the source rejects it, `cursor_seek_fallback` decides.
pub fn seek_start(
    source: &mut dyn LogSource,
    input: &InputConfig,
) -> Result<StartedAt, PipelineError> {
    let position = match input.seek_position {
        StartPosition::Head => StartPosition::Head,
        StartPosition::Tail => StartPosition::Tail,
        StartPosition::Cursor => {
            let reason = match load_checkpoint(&input.cursor_state_file) {
                Some(cursor) => match source.seek_cursor(&cursor) {
                    Ok(()) => {
                        tracing::info!(cursor = %cursor, "resuming from saved cursor");
                        return Ok(StartedAt::Cursor(cursor));
                    }
                    Err(e) => {
                        tracing::warn!(cursor = %cursor, error = %e, "could not seek to saved cursor");
                        format!("seek to {cursor}: {e}")
                    }
                },
                None => format!("no cursor in {}", input.cursor_state_file.display()),
            };
            match input.cursor_seek_fallback {
                SeekFallback::None => return Err(PipelineError::ResumeFailed { reason }),
                SeekFallback::Head => StartPosition::Head,
                SeekFallback::Tail => StartPosition::Tail,
            }
        }
    };

    if position == StartPosition::Head {
        source
            .seek_head()
            .map_err(|e| PipelineError::Seek { position: "head", source: e })?;
        tracing::info!("reading from the head");
        Ok(StartedAt::Head)
    } else {
        source
            .seek_tail()
            .map_err(|e| PipelineError::Seek { position: "tail", source: e })?;
        tracing::info!("reading from the tail");
        Ok(StartedAt::Tail)
    }
}
