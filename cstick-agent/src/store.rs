//! Streaming access to the on-disk record store
//!
//! The capture file is read one line per poll so a single cooperative loop
//! can interleave reading with connectivity upkeep. The cursor owns the open
//! file handle and the header flag; on exhaustion it closes the handle and
//! the next poll starts the file over, so the capture replays forever.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Result of advancing the cursor by one unit of work.
#[derive(Debug)]
pub enum LineOutcome {
    /// The store was (re)opened and its header line consumed.
    HeaderSkipped,
    /// One record line, trimmed. May be empty; empty records are never
    /// published but the cursor has advanced past them.
    Record(String),
    /// The store is exhausted. The handle is closed; the next poll reopens
    /// at the first line.
    EndOfStream,
    /// The store could not be opened or read. Retried on the next poll.
    OpenFailed(io::Error),
}

/// Stateful one-line-per-poll reader over the record store.
pub struct StreamCursor {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    header_skipped: bool,
}

impl StreamCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            header_skipped: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a file handle is currently open.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Advance by one unit: open plus header skip on the first poll of a
    /// pass, one record per poll afterwards, close on end of file.
    pub async fn poll(&mut self) -> LineOutcome {
        // Take the handle out; it only goes back in when there is more to
        // read, so end of file and read errors leave the cursor closed.
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => match File::open(&self.path).await {
                Ok(file) => {
                    debug!("Opened record store: {}", self.path.display());
                    self.header_skipped = false;
                    BufReader::new(file)
                }
                Err(e) => return LineOutcome::OpenFailed(e),
            },
        };

        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Record store exhausted, restarting on the next poll");
                LineOutcome::EndOfStream
            }
            Ok(_) => {
                self.reader = Some(reader);
                let line = line.trim().to_string();
                if !self.header_skipped {
                    self.header_skipped = true;
                    LineOutcome::HeaderSkipped
                } else {
                    LineOutcome::Record(line)
                }
            }
            Err(e) => LineOutcome::OpenFailed(e),
        }
    }
}

/// Log the store directory contents and check the record file, the way the
/// firmware listed its flash filesystem at boot. Absence of the record file
/// is not fatal; the cursor retries on every tick.
pub async fn inspect_store(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    info!("Record store directory: {}", dir.display());
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut seen = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_file() {
            info!("  {} ({} bytes)", entry.file_name().to_string_lossy(), meta.len());
            seen += 1;
        }
    }
    if seen == 0 {
        warn!("Store directory holds no files: {}", dir.display());
    }

    match tokio::fs::metadata(path).await {
        Ok(meta) => info!(
            "Record store present: {} ({} bytes)",
            path.display(),
            meta.len()
        ),
        Err(_) => warn!(
            "Record store missing: {} (will retry every tick)",
            path.display()
        ),
    }
    Ok(())
}
