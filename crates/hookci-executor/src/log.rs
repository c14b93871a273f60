//! Per-build log.
//!
//! Lines written by hookci itself look like
//! `[2024-06-01 12:00:00 INFO] [hookci]: Cloning repository`; output of the
//! commands the build runs is appended verbatim in between.

use chrono::Local;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::warn;

enum Target {
    File { path: PathBuf, file: File },
    Stdout,
}

pub struct BuildLog {
    target: Target,
}

impl BuildLog {
    /// Start a fresh log at `path`, replacing any previous log.
    ///
    /// The file is opened in append mode so that writers sharing the path
    /// (section headers, child processes) never overwrite each other.
    pub fn create(path: &Path) -> io::Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Self::append(path)
    }

    /// Append to an existing log, creating it if needed.
    pub fn append(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            target: Target::File {
                path: path.to_path_buf(),
                file,
            },
        })
    }

    /// Log to standard output; used by a runner whose stdout is the log file.
    pub fn stdout() -> Self {
        Self {
            target: Target::Stdout,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::File { path, .. } => Some(path),
            Target::Stdout => None,
        }
    }

    pub fn info(&self, message: impl Display) {
        self.line("INFO", message);
    }

    pub fn warn(&self, message: impl Display) {
        self.line("WARNING", message);
    }

    pub fn error(&self, message: impl Display) {
        self.line("ERROR", message);
    }

    /// Append raw bytes, e.g. output forwarded from elsewhere.
    pub fn write_raw(&self, data: &[u8]) {
        if let Err(e) = self.write_all(data) {
            warn!(error = %e, "Failed to write build log");
        }
    }

    /// A handle child processes can write their stdout/stderr to.
    pub fn stdio(&self) -> io::Result<Stdio> {
        match &self.target {
            Target::File { file, .. } => Ok(Stdio::from(file.try_clone()?)),
            Target::Stdout => Ok(Stdio::inherit()),
        }
    }

    fn line(&self, level: &str, message: impl Display) {
        let line = format!(
            "[{} {}] [hookci]: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            message
        );
        self.write_raw(line.as_bytes());
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        match &self.target {
            Target::File { file, .. } => {
                let mut file = file;
                file.write_all(data)?;
                file.flush()
            }
            Target::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(data)?;
                stdout.flush()
            }
        }
    }
}
