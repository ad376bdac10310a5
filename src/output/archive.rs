//! Single-archive output sink.
//!
//! Callers buffer their output privately and in parallel. Committing a
//! finished buffer as a tar entry takes the archive lock, since the
//! underlying gzip stream has exactly one writer.

use super::{OutputSink, OutputWriter, SinkError};
use crate::layout;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tar::{Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Permission bits of every entry written through the sink.
const ENTRY_MODE: u32 = 0o775;

struct ArchiveState<W: Write> {
    builder: Option<Builder<GzEncoder<W>>>,
    last_mtime: u64,
}

struct Shared<W: Write> {
    state: Mutex<ArchiveState<W>>,
    reserved: Mutex<HashSet<String>>,
    /// Copies of the resource definitions, the only entries read back.
    retained: Mutex<HashMap<String, Vec<u8>>>,
}

/// Streams every logical path into one gzip-compressed tar archive.
pub struct ArchiveSink<W: Write + Send + 'static = File> {
    shared: Arc<Shared<W>>,
}

impl<W: Write + Send + 'static> ArchiveSink<W> {
    pub fn new(out: W) -> Self {
        let encoder = GzEncoder::new(out, Compression::default());
        let builder = Builder::new(encoder);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ArchiveState {
                    builder: Some(builder),
                    last_mtime: 0,
                }),
                reserved: Mutex::new(HashSet::new()),
                retained: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Write the tar trailer, flush the gzip stream and hand back the
    /// underlying writer. Entries still being buffered are lost.
    pub fn finish(&self) -> Result<W, SinkError> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let builder = state.builder.take().ok_or(SinkError::Closed)?;

        let finish_err = |source| SinkError::Write {
            path: "<archive>".to_string(),
            source,
        };
        let encoder = builder.into_inner().map_err(finish_err)?;
        let mut out = encoder.finish().map_err(finish_err)?;
        out.flush().map_err(finish_err)?;
        Ok(out)
    }
}

impl<W: Write + Send + 'static> Shared<W> {
    fn commit(&self, path: &str, data: &[u8]) -> Result<(), SinkError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let mtime = (chrono::Utc::now().timestamp().max(0) as u64).max(state.last_mtime);
            state.last_mtime = mtime;

            let builder = state.builder.as_mut().ok_or(SinkError::Closed)?;

            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(ENTRY_MODE);
            header.set_mtime(mtime);

            builder
                .append_data(&mut header, path, data)
                .map_err(|source| SinkError::Write {
                    path: path.to_string(),
                    source,
                })?;
        }

        if layout::is_definitions(path) {
            self.retained
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(path.to_string(), data.to_vec());
        }

        debug!("Archived {} ({} bytes)", path, data.len());
        Ok(())
    }
}

impl<W: Write + Send + 'static> OutputSink for ArchiveSink<W> {
    fn create(&self, path: &str) -> Result<Box<dyn OutputWriter>, SinkError> {
        if path.is_empty() {
            return Err(SinkError::EmptyPath);
        }

        let fresh = self
            .shared
            .reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
        if !fresh {
            return Err(SinkError::Duplicate(path.to_string()));
        }

        Ok(Box::new(EntryWriter {
            path: path.to_string(),
            buffer: Vec::new(),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, SinkError> {
        self.shared
            .retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| SinkError::Read {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "entry not retained"),
            })
    }
}

struct EntryWriter<W: Write + Send + 'static> {
    path: String,
    buffer: Vec<u8>,
    shared: Arc<Shared<W>>,
}

impl<W: Write + Send + 'static> Write for EntryWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write + Send + 'static> OutputWriter for EntryWriter<W> {
    fn finish(self: Box<Self>) -> Result<(), SinkError> {
        self.shared.commit(&self.path, &self.buffer)
    }
}

/// Package the directory `src` into a gzip-compressed tar at `dest`.
///
/// Entries are prefixed with the directory's own name, the way
/// `tar -czf dest src` lays them out. Returns the number of files packaged.
pub fn package_dir(src: &Path, dest: &Path) -> io::Result<usize> {
    let prefix = src
        .file_name()
        .map(Path::new)
        .unwrap_or_else(|| Path::new("dump"));

    let file = File::create(dest)?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    let mut files = 0;

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let name = prefix.join(relative);

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), &name)?;
            files += 1;
        }
    }

    builder.into_inner()?.finish()?.sync_all()?;
    Ok(files)
}
