use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Replace `path` with whatever `write` produces, atomically.
///
/// The content goes to a temp file in the same directory, is flushed and
/// synced, then renamed over the target. Readers see either the previous
/// file or the complete new one. On any error the target is untouched and
/// the temp file is removed.
pub fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;

    let prefix = format!(".{}.", name.to_string_lossy());
    let mut tmp = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write(&mut out)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
