//! PID file handling (spec §6, "-p <pidfile>"): write the daemon's process
//! id on startup, remove it on a clean shutdown. Best-effort only -- no
//! durable state depends on this file surviving (spec §6, "Persisted
//! state: None").

use std::path::Path;

use anyhow::{Context, Result};

/// Write the current process id to `path`, truncating any existing file.
pub fn write(path: &Path) -> Result<()> {
    let pid = std::process::id();
    std::fs::write(path, format!("{pid}\n"))
        .with_context(|| format!("failed to write pid to {}", path.display()))?;
    tracing::debug!(?path, pid, "wrote pidfile");
    Ok(())
}

/// Remove the pidfile written by [`write`]. Not calling this on an
/// abnormal exit is harmless: the next start overwrites it.
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove pidfile {}", path.display())),
    }
}
