//! PID file for daemon-style operation.
//!
//! The server writes its PID to `server.pid_file` and holds an `fs2`
//! exclusive lock on it for as long as the [`PidFile`] lives, so a second
//! instance pointed at the same file refuses to start.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use fs2::FileExt;

/// Held for the lifetime of the server.  Dropping it removes the file and
/// releases the lock.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    // Keeps the advisory lock alive.
    _file: File,
}

impl PidFile {
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening PID file {}", path.display()))?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "another session-linker instance is running (PID file {} is locked)",
                path.display()
            )
        })?;

        // Truncate only once the lock is ours, so a running instance's PID
        // is never wiped by a losing contender.
        file.set_len(0)?;
        let pid = std::process::id();
        writeln!(file, "{pid}")?;
        file.flush()?;

        tracing::info!(path = %path.display(), pid, "PID file written");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "PID file removed"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove PID file")
            }
        }
    }
}
