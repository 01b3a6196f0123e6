use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),

    #[error("could not open log file `{path}`: {source}")]
    OpenLogFile { path: String, source: io::Error },
}

pub struct Logging;

impl Logging {
    /// Initializes the global tracing subscriber writing to stderr. Used when no log directory
    /// is configured (the default).
    pub fn try_init() -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .fmt_fields(PrettyFields::new())
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError("unable to set global logging subscriber".to_string())
            })
    }

    /// Initializes the global tracing subscriber writing to a size-rotated file under `dir`.
    /// The file rotates once it exceeds `max_bytes`, keeping at most `max_backups` numbered
    /// backups (`<file_name>.1` is the most recent). The returned [`WorkerGuard`] must be held
    /// for the lifetime of the process: dropping it flushes and stops the background writer
    /// thread.
    pub fn try_init_rotating(
        dir: &Path,
        file_name: &str,
        max_bytes: u64,
        max_backups: u32,
    ) -> Result<WorkerGuard, LoggingError> {
        let writer = SizeRotatingWriter::new(dir, file_name, max_bytes, max_backups)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);

        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .fmt_fields(PrettyFields::new())
            .with_ansi(false)
            .with_writer(non_blocking)
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError("unable to set global logging subscriber".to_string())
            })?;

        Ok(guard)
    }
}

/// A [`Write`] that rotates the underlying file once it exceeds `max_bytes`, keeping at most
/// `max_backups` numbered backups. Wrapped in [`tracing_appender::non_blocking`] the same way
/// the teacher wraps its own rolling appender, so writes never block the calling thread on file
/// IO; only the single background writer thread ever touches this struct, so no internal locking
/// is needed.
struct SizeRotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    max_backups: u32,
    file: File,
    written: u64,
}

impl SizeRotatingWriter {
    fn new(dir: &Path, file_name: &str, max_bytes: u64, max_backups: u32) -> Result<Self, LoggingError> {
        std::fs::create_dir_all(dir).map_err(|source| LoggingError::OpenLogFile {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join(file_name);
        let file = Self::open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            max_backups,
            file,
            written,
        })
    }

    fn open(path: &Path) -> Result<File, LoggingError> {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|source| LoggingError::OpenLogFile {
                path: path.display().to_string(),
                source,
            })
    }

    fn backup_path(&self, generation: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{generation}"));
        PathBuf::from(name)
    }

    /// Shifts `<name>.1 .. .<max_backups - 1>` up by one generation, dropping anything already
    /// at `<name>.<max_backups>`, then moves the active file to `<name>.1` and opens a fresh one.
    fn rotate(&mut self) -> io::Result<()> {
        if self.max_backups == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .create(true)
                .open(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        let oldest = self.backup_path(self.max_backups);
        let _ = std::fs::remove_file(&oldest);
        for generation in (1..self.max_backups).rev() {
            let from = self.backup_path(generation);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(generation + 1))?;
            }
        }
        std::fs::rename(&self.path, self.backup_path(1))?;
        self.file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_once_max_bytes_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRotatingWriter::new(dir.path(), "taskmaster.log", 10, 2).unwrap();

        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"more").unwrap();
        writer.flush().unwrap();

        assert!(dir.path().join("taskmaster.log").exists());
        assert!(dir.path().join("taskmaster.log.1").exists());
    }

    #[test]
    fn keeps_at_most_max_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRotatingWriter::new(dir.path(), "taskmaster.log", 5, 1).unwrap();

        for _ in 0..5 {
            writer.write_all(b"123456").unwrap();
        }
        writer.flush().unwrap();

        assert!(dir.path().join("taskmaster.log").exists());
        assert!(dir.path().join("taskmaster.log.1").exists());
        assert!(!dir.path().join("taskmaster.log.2").exists());
    }
}
