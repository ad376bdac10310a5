//! Per-process execution metadata.
//!
//! Every launched command leaves one JSON record, named after its process
//! id, in the metadata directory. Records are observational and never read
//! back by the tool itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

/// Metadata of one command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedExecution {
    pub pid: u32,
    pub args: Vec<String>,
    pub stdout_path: String,
    /// Only set when the command wrote to stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub user_time_secs: f64,
    pub system_time_secs: f64,
    /// Peak resident set size, in kilobytes.
    pub max_rss_kb: i64,
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
}

/// Append-only store of [`CapturedExecution`] records.
#[derive(Debug)]
pub struct MetadataStore {
    dir: PathBuf,
    ready: OnceLock<Result<(), String>>,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ready: OnceLock::new(),
        }
    }

    /// `<pid>.json`, or `<pid>-<seq>.json` once the pid has been reused.
    fn path_for(&self, pid: u32, seq: u32) -> PathBuf {
        if seq == 0 {
            self.dir.join(format!("{}.json", pid))
        } else {
            self.dir.join(format!("{}-{}.json", pid, seq))
        }
    }

    /// Write `bytes` to the first free path for `pid`. Records are never
    /// overwritten.
    fn write_new(&self, pid: u32, bytes: &[u8]) -> io::Result<PathBuf> {
        for seq in 0..u32::MAX {
            let path = self.path_for(pid, seq);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if seq > 0 {
                        warn!("Process id {} was reused, metadata saved as {}", pid, path.display());
                    }
                    file.write_all(bytes)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(io::ErrorKind::AlreadyExists, "no free metadata path"))
    }

    /// Persist `record`. Failures are logged, never returned: metadata must
    /// not turn a successful capture into a failed one.
    pub fn record(&self, record: &CapturedExecution) {
        let ready = self
            .ready
            .get_or_init(|| fs::create_dir_all(&self.dir).map_err(|e| e.to_string()));
        if let Err(e) = ready {
            warn!(
                "Failed to create metadata directory {}: {}",
                self.dir.display(),
                e
            );
            return;
        }

        let command = record.args.join(" ");
        let bytes = match serde_json::to_vec_pretty(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize execution metadata: {}: {}", command, e);
                return;
            }
        };
        if let Err(e) = self.write_new(record.pid, &bytes) {
            warn!("Failed to write execution metadata: {}: {}", command, e);
        }
    }
}
