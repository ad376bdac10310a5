//! Filesystem output sink.

use super::{OutputSink, OutputWriter, SinkError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// Writes each logical path to a file under a base directory.
#[derive(Debug, Clone)]
pub struct DirSink {
    base: PathBuf,
}

impl DirSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resolve a slash-delimited logical path below the base directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.base.clone(), |acc, part| acc.join(part))
    }
}

impl OutputSink for DirSink {
    fn create(&self, path: &str) -> Result<Box<dyn OutputWriter>, SinkError> {
        if path.is_empty() {
            return Err(SinkError::EmptyPath);
        }

        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| SinkError::DirectoryCreation {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    SinkError::Duplicate(path.to_string())
                } else {
                    SinkError::Create {
                        path: path.to_string(),
                        source,
                    }
                }
            })?;

        Ok(Box::new(FileWriter {
            path: path.to_string(),
            inner: BufWriter::new(file),
        }))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, SinkError> {
        fs::read(self.resolve(path)).map_err(|source| SinkError::Read {
            path: path.to_string(),
            source,
        })
    }
}

struct FileWriter {
    path: String,
    inner: BufWriter<File>,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl OutputWriter for FileWriter {
    fn finish(mut self: Box<Self>) -> Result<(), SinkError> {
        self.inner.flush().map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
