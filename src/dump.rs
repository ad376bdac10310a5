//! The on-disk target of one run.
//!
//! In directory mode output lands in `<output-dir>/<timestamp>/` and is
//! packaged into `<output-dir>/<timestamp>.tar.gz` when the run ends. In
//! archive mode output is streamed straight into that `.tar.gz`; only the
//! log file and execution metadata live in a scratch directory until they
//! are added to the archive at the end.

use crate::layout;
use crate::output::{self, package_dir, ArchiveSink, DirSink, OutputSink};
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Dump directory names, based on RFC 3339 without colons.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

pub struct Dump {
    /// Directory holding the log file and the metadata records.
    base: PathBuf,
    archive_path: PathBuf,
    sink: Arc<dyn OutputSink>,
    stream: Option<Arc<ArchiveSink>>,
}

impl Dump {
    /// Prepare the target for a run started at `timestamp`.
    pub fn create(output_dir: &Path, timestamp: &str, stream: bool) -> Result<Self> {
        let archive_path = output_dir.join(format!("{}.tar.gz", timestamp));

        if !stream {
            let base = output_dir.join(timestamp);
            fs::create_dir_all(&base)
                .with_context(|| format!("Failed to create dump directory: {}", base.display()))?;
            return Ok(Self {
                sink: Arc::new(DirSink::new(&base)),
                base,
                archive_path,
                stream: None,
            });
        }

        let base = output_dir.join(format!("{}.work", timestamp));
        fs::create_dir_all(&base)
            .with_context(|| format!("Failed to create work directory: {}", base.display()))?;
        let file = File::create(&archive_path)
            .with_context(|| format!("Failed to create archive: {}", archive_path.display()))?;
        let archive = Arc::new(ArchiveSink::new(file));

        Ok(Self {
            sink: archive.clone(),
            base,
            archive_path,
            stream: Some(archive),
        })
    }

    pub fn sink(&self) -> Arc<dyn OutputSink> {
        Arc::clone(&self.sink)
    }

    /// Where the dump's data can be found while the run is going on.
    pub fn location(&self) -> &Path {
        if self.stream.is_some() {
            &self.archive_path
        } else {
            &self.base
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base.join(layout::RUNS_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.base.join(layout::LOG_FILE)
    }

    /// Produce the final archive and return its path.
    ///
    /// In directory mode the tree is only removed once it was packaged; on
    /// failure it stays in place.
    pub fn finish(self) -> Result<PathBuf> {
        match self.stream {
            None => {
                let files = package_dir(&self.base, &self.archive_path).with_context(|| {
                    format!(
                        "Could not archive dump data, unarchived data in: {}",
                        self.base.display()
                    )
                })?;
                debug!("Packaged {} file(s)", files);

                // Nothing useful can be done if this fails.
                if let Err(e) = fs::remove_dir_all(&self.base) {
                    debug!("Could not remove {}: {}", self.base.display(), e);
                }
            }
            Some(archive) => {
                add_scratch_files(archive.as_ref(), &self.base)?;
                let file = archive.finish().context("Could not finalize archive")?;
                file.sync_all().context("Could not finalize archive")?;

                if let Err(e) = fs::remove_dir_all(&self.base) {
                    debug!("Could not remove {}: {}", self.base.display(), e);
                }
            }
        }

        Ok(self.archive_path)
    }
}

/// Copy every file of the scratch directory into the archive, keeping its
/// relative path.
fn add_scratch_files(archive: &dyn OutputSink, base: &Path) -> Result<()> {
    for entry in WalkDir::new(base).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(base)?;
        let logical = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match fs::read(entry.path()) {
            Ok(bytes) => output::write_bytes(archive, &logical, &bytes)?,
            Err(e) => warn!("Could not add {} to the archive: {}", logical, e),
        }
    }
    Ok(())
}
