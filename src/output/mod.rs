//! Output sinks.
//!
//! An [`OutputSink`] maps a slash-delimited logical path to a writable
//! destination. Two realizations exist:
//! - [`DirSink`]: one file per logical path under a base directory
//! - [`ArchiveSink`]: one entry per logical path in a single `.tar.gz` stream
//!
//! Both reject a second write to the same logical path within a run.

pub mod archive;
pub mod fs;

pub use archive::{package_dir, ArchiveSink};
pub use fs::DirSink;

use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("missing path to output")]
    EmptyPath,

    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreation { path: PathBuf, source: io::Error },

    #[error("failed to create {path}: {source}")]
    Create { path: String, source: io::Error },

    #[error("output path written twice: {0}")]
    Duplicate(String),

    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },

    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("archive is already finished")]
    Closed,
}

/// A destination for one logical path.
///
/// Writers are private to their caller. Nothing is published until
/// [`OutputWriter::finish`] is called.
pub trait OutputWriter: Write + Send {
    fn finish(self: Box<Self>) -> Result<(), SinkError>;
}

pub trait OutputSink: Send + Sync {
    /// Open a fresh destination for `path`.
    fn create(&self, path: &str) -> Result<Box<dyn OutputWriter>, SinkError>;

    /// Read back the bytes previously written to `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>, SinkError>;
}

/// Write `bytes` to `path` in one step.
pub fn write_bytes(sink: &dyn OutputSink, path: &str, bytes: &[u8]) -> Result<(), SinkError> {
    let mut writer = sink.create(path)?;
    writer.write_all(bytes).map_err(|source| SinkError::Write {
        path: path.to_string(),
        source,
    })?;
    writer.finish()
}
