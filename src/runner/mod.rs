//! External command execution with output capture.
//!
//! A [`Runner`] executes one command and sends its stdout to a logical path
//! of an [`OutputSink`]. Stderr is buffered and only materialized as
//! `<path>.stderr` when the command actually wrote something to it.

pub mod metadata;

pub use metadata::{CapturedExecution, MetadataStore};

use crate::layout;
use crate::output::{self, OutputSink, SinkError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A program and its arguments. Opaque to the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    program: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("command \"{command}\": missing path to output")]
    MissingDestination { command: String },

    #[error("command \"{command}\": failed to create directory {}: {source}", path.display())]
    DirectoryCreation {
        command: String,
        path: PathBuf,
        source: io::Error,
    },

    #[error("command \"{command}\": failed to start: {source}")]
    Launch { command: String, source: io::Error },

    #[error("command \"{command}\": {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("command \"{command}\": {source}")]
    Output { command: String, source: SinkError },
}

impl RunError {
    fn from_sink(command: &Command, err: SinkError) -> Self {
        match err {
            SinkError::DirectoryCreation { path, source } => RunError::DirectoryCreation {
                command: command.to_string(),
                path,
                source,
            },
            other => RunError::Output {
                command: command.to_string(),
                source: other,
            },
        }
    }
}

/// Runs commands, capturing their output under a logical path.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `command`, writing its stdout to `path`.
    async fn run(&self, command: &Command, path: &str) -> Result<(), RunError>;

    /// Like [`Runner::run`], also returning the stdout bytes.
    async fn run_captured(&self, command: &Command, path: &str) -> Result<Vec<u8>, RunError>;
}

/// The production [`Runner`]: dumps output through a sink and records
/// execution metadata per process.
#[derive(Clone)]
pub struct DumpRunner {
    sink: Arc<dyn OutputSink>,
    metadata: Option<Arc<MetadataStore>>,
}

impl DumpRunner {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, store: MetadataStore) -> Self {
        self.metadata = Some(Arc::new(store));
        self
    }

    async fn spawn_execute(
        &self,
        command: &Command,
        path: &str,
        tee: bool,
    ) -> Result<Vec<u8>, RunError> {
        let runner = self.clone();
        let owned_command = command.clone();
        let owned_path = path.to_string();

        tokio::task::spawn_blocking(move || runner.execute(&owned_command, &owned_path, tee))
            .await
            .map_err(|e| RunError::Launch {
                command: command.to_string(),
                source: io::Error::other(e),
            })?
    }

    /// Blocking body of a run. Steps are strictly sequential: destination,
    /// capture, stderr, metadata.
    fn execute(&self, command: &Command, path: &str, tee: bool) -> Result<Vec<u8>, RunError> {
        if path.is_empty() {
            return Err(RunError::MissingDestination {
                command: command.to_string(),
            });
        }

        let mut stdout_dest = self
            .sink
            .create(path)
            .map_err(|e| RunError::from_sink(command, e))?;

        let start_time = Utc::now();
        let mut child = std::process::Command::new(command.program())
            .args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunError::Launch {
                command: command.to_string(),
                source,
            })?;
        let pid = child.id();
        debug!("Started [{}] {} -> {}", pid, command, path);

        // Stderr is drained on its own thread so a chatty stderr can never
        // block the stdout copy below.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let mut captured = Vec::new();
        let copy_result = match child.stdout.take() {
            Some(mut pipe) => copy_stdout(
                &mut pipe,
                &mut stdout_dest,
                if tee { Some(&mut captured) } else { None },
            ),
            None => Ok(()),
        };

        let exit = wait_with_usage(child);
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let end_time = Utc::now();

        let finish_result = stdout_dest.finish();

        let stderr_path = layout::stderr_of(path);
        let stderr_result = if stderr.is_empty() {
            Ok(false)
        } else {
            output::write_bytes(self.sink.as_ref(), &stderr_path, &stderr).map(|_| true)
        };

        if let (Some(store), Ok(exit)) = (&self.metadata, &exit) {
            store.record(&CapturedExecution {
                pid,
                args: command.argv(),
                stdout_path: path.to_string(),
                stderr_path: matches!(stderr_result, Ok(true)).then(|| stderr_path.clone()),
                start_time,
                end_time,
                user_time_secs: exit.user_time.as_secs_f64(),
                system_time_secs: exit.system_time.as_secs_f64(),
                max_rss_kb: exit.max_rss_kb,
                exit_code: exit.code.unwrap_or(-1),
            });
        }

        let exit = exit.map_err(|source| RunError::Launch {
            command: command.to_string(),
            source,
        })?;
        if !exit.success() {
            return Err(RunError::NonZeroExit {
                command: command.to_string(),
                status: exit.describe(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        copy_result.map_err(|e| RunError::from_sink(command, e))?;
        finish_result.map_err(|e| RunError::from_sink(command, e))?;
        if let Err(e) = stderr_result {
            warn!("Could not save stderr of {}: {}", command, e);
        }

        Ok(captured)
    }
}

#[async_trait]
impl Runner for DumpRunner {
    async fn run(&self, command: &Command, path: &str) -> Result<(), RunError> {
        self.spawn_execute(command, path, false).await.map(|_| ())
    }

    async fn run_captured(&self, command: &Command, path: &str) -> Result<Vec<u8>, RunError> {
        self.spawn_execute(command, path, true).await
    }
}

/// Copy the child's stdout verbatim into `dest`, optionally keeping a copy.
///
/// On a destination error the pipe is still drained so the child can exit.
fn copy_stdout(
    pipe: &mut impl Read,
    dest: &mut impl Write,
    mut tee: Option<&mut Vec<u8>>,
) -> Result<(), SinkError> {
    let mut buf = [0u8; 8192];
    loop {
        let n = match pipe.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(SinkError::Read {
                    path: "<stdout>".to_string(),
                    source,
                })
            }
        };
        if let Err(source) = dest.write_all(&buf[..n]) {
            let _ = io::copy(pipe, &mut io::sink());
            return Err(SinkError::Write {
                path: "<stdout>".to_string(),
                source,
            });
        }
        if let Some(copy) = tee.as_mut() {
            copy.extend_from_slice(&buf[..n]);
        }
    }
}

/// Exit status and resource usage of a finished child.
#[derive(Debug, Clone, Default)]
struct ExitInfo {
    code: Option<i32>,
    signal: Option<i32>,
    user_time: Duration,
    system_time: Duration,
    max_rss_kb: i64,
}

impl ExitInfo {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit status {}", code),
            (None, Some(sig)) => format!("terminated by signal {}", sig),
            (None, None) => "terminated abnormally".to_string(),
        }
    }
}

#[cfg(unix)]
fn wait_with_usage(child: std::process::Child) -> io::Result<ExitInfo> {
    let pid = child.id() as libc::pid_t;
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; all-zero is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        // SAFETY: pid is our own unreaped child and both out-pointers are
        // valid for the duration of the call.
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc != -1 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    // The child is reaped; `Child` does not wait on drop.
    drop(child);

    let timeval = |tv: libc::timeval| {
        Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
    };

    Ok(ExitInfo {
        code: libc::WIFEXITED(status).then(|| libc::WEXITSTATUS(status)),
        signal: libc::WIFSIGNALED(status).then(|| libc::WTERMSIG(status)),
        user_time: timeval(usage.ru_utime),
        system_time: timeval(usage.ru_stime),
        max_rss_kb: usage.ru_maxrss as i64,
    })
}

#[cfg(not(unix))]
fn wait_with_usage(mut child: std::process::Child) -> io::Result<ExitInfo> {
    let status = child.wait()?;
    Ok(ExitInfo {
        code: status.code(),
        ..ExitInfo::default()
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted in-memory runner.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RunCall {
        pub argv: Vec<String>,
        pub path: String,
    }

    /// Records every call; returns canned stdout keyed by the command line.
    #[derive(Default)]
    pub struct FakeRunner {
        recorded: Mutex<Vec<RunCall>>,
        outputs: HashMap<String, Result<Vec<u8>, String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, command_line: &str, stdout: &str) -> Self {
            self.outputs
                .insert(command_line.to_string(), Ok(stdout.as_bytes().to_vec()));
            self
        }

        pub fn fail(mut self, command_line: &str, stderr: &str) -> Self {
            self.outputs
                .insert(command_line.to_string(), Err(stderr.to_string()));
            self
        }

        pub fn calls(&self) -> Vec<RunCall> {
            self.recorded.lock().unwrap().clone()
        }

        fn call(&self, command: &Command, path: &str) -> Result<Vec<u8>, RunError> {
            self.recorded.lock().unwrap().push(RunCall {
                argv: command.argv(),
                path: path.to_string(),
            });
            match self.outputs.get(&command.to_string()) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err(stderr)) => Err(RunError::NonZeroExit {
                    command: command.to_string(),
                    status: "exit status 1".to_string(),
                    stderr: stderr.clone(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Runner for FakeRunner {
        async fn run(&self, command: &Command, path: &str) -> Result<(), RunError> {
            self.call(command, path).map(|_| ())
        }

        async fn run_captured(&self, command: &Command, path: &str) -> Result<Vec<u8>, RunError> {
            self.call(command, path)
        }
    }
}
