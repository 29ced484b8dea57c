//! Source watcher for auto-restart.
//!
//! Watches a directory tree and reports files with a watched extension that
//! changed after the server started. The server answers with a full process
//! restart rather than an in-process reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// A watcher that monitors source files for changes.
#[derive(Debug, Clone)]
pub struct SourceWatcher {
    dir: PathBuf,
    extensions: Vec<String>,
    started: SystemTime,
}

impl SourceWatcher {
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>, started: SystemTime) -> Self {
        Self {
            dir: dir.into(),
            extensions,
            started,
        }
    }

    /// Start watching in the background.
    ///
    /// Returns the watcher (watching stops when it is dropped) and a
    /// receiver of changed paths.
    pub fn run(self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<PathBuf>), notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let filter = self.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    for path in event.paths {
                        if filter.is_relevant(&path) {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        watcher.watch(&self.dir, RecursiveMode::Recursive)?;
        tracing::info!(dir = ?self.dir, extensions = ?self.extensions, "Source watcher started");
        Ok((watcher, rx))
    }

    /// Watched extension and modified after start.
    pub fn is_relevant(&self, path: &Path) -> bool {
        let watched = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.trim_start_matches('.') == ext));
        if !watched {
            return false;
        }
        std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(|modified| modified > self.started)
            .unwrap_or(false)
    }
}

/// Replace the running process with a fresh invocation of itself.
///
/// Only returns on failure.
pub fn restart_process() -> std::io::Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e,
    };
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    tracing::warn!(exe = %exe.display(), "Restarting process");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        Command::new(exe).args(args).exec()
    }
    #[cfg(not(unix))]
    {
        match Command::new(exe).args(args).spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => e,
        }
    }
}
