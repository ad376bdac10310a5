//! Capture tasks.
//!
//! Each task wraps one or a few `oc` invocations and writes their output to
//! a fixed logical path of the dump. Tasks that discover more work, such as
//! the log discovery, push follow-up tasks into the pool's task stream.

pub mod components;
pub mod enumerate;

pub use components::{Component, ComponentDiscoveryTask};
pub use enumerate::{check_prerequisites, Enumerator};

use crate::errors::{ErrorList, Severity, SeverityExt, TaskError};
use crate::layout;
use crate::pool::{BoxedTask, Task, TaskSender};
use crate::runner::{Command, Runner};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Default cap on log lines fetched per container.
pub const DEFAULT_MAX_LOG_LINES: usize = 1000;

/// What to collect and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectConfig {
    /// The cluster CLI binary.
    pub oc: String,
    /// Kinds whose definitions are dumped per project.
    pub resources: Vec<String>,
    /// Kinds whose logs are dumped per project.
    pub resources_with_logs: Vec<String>,
    pub max_log_lines: usize,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            oc: "oc".to_string(),
            resources: ["deploymentconfigs", "pods", "services", "events"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            resources_with_logs: ["deploymentconfigs", "pods"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_log_lines: DEFAULT_MAX_LOG_LINES,
        }
    }
}

impl CollectConfig {
    pub(crate) fn oc(&self) -> Command {
        Command::new(&self.oc)
    }

    pub(crate) fn oc_in(&self, project: &str) -> Command {
        self.oc().args(["-n", project])
    }
}

/// Split captured output into whitespace-separated words.
pub fn read_words(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn is_pod_type(rtype: &str) -> bool {
    matches!(rtype, "po" | "pod" | "pods")
}

/// Run one command into one path.
pub struct CaptureTask {
    runner: Arc<dyn Runner>,
    command: Command,
    path: String,
    severity: Severity,
}

impl CaptureTask {
    pub fn new(runner: Arc<dyn Runner>, command: Command, path: impl Into<String>) -> Self {
        Self {
            runner,
            command,
            path: path.into(),
            severity: Severity::Fatal,
        }
    }

    /// Report failures as ignorable.
    pub fn ignorable(mut self) -> Self {
        self.severity = Severity::Ignorable;
        self
    }
}

#[async_trait]
impl Task for CaptureTask {
    fn describe(&self) -> String {
        format!("{} > {}", self.command, self.path)
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        self.runner
            .run(&self.command, &self.path)
            .await
            .map_err(|e| TaskError::new(self.severity, e))
    }
}

/// Dump the JSON definitions of several kinds in one project.
///
/// Kinds are fetched one at a time into separate files; a failing kind is
/// recorded and the next one still runs.
pub struct DefinitionsTask {
    runner: Arc<dyn Runner>,
    config: Arc<CollectConfig>,
    project: String,
}

impl DefinitionsTask {
    pub fn new(runner: Arc<dyn Runner>, config: Arc<CollectConfig>, project: impl Into<String>) -> Self {
        Self {
            runner,
            config,
            project: project.into(),
        }
    }
}

#[async_trait]
impl Task for DefinitionsTask {
    fn describe(&self) -> String {
        format!("definitions of project {}", self.project)
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        let mut errors = ErrorList::new();

        for kind in &self.config.resources {
            let command = self
                .config
                .oc_in(&self.project)
                .args(["get", kind.as_str(), "-o=json"]);
            let path = layout::definitions(&self.project, kind);
            errors.record(self.runner.run(&command, &path).await.fatal());
        }

        errors.into_task_result()
    }
}

/// A resource whose logs can be fetched with `oc logs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggableResource {
    pub project: String,
    /// `pod`, `deploymentconfig` or an alias `oc logs` understands.
    pub rtype: String,
    pub name: String,
    /// Empty for resources that are not pods.
    pub container: String,
}

impl LoggableResource {
    fn target(&self) -> String {
        if self.rtype.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.rtype, self.name)
        }
    }

    fn file_stem(&self) -> String {
        let mut stem = self.name.clone();
        if !self.rtype.is_empty() {
            stem = format!("{}_{}", self.rtype, stem);
        }
        if !self.container.is_empty() {
            stem.push('_');
            stem.push_str(&self.container);
        }
        stem
    }
}

/// Fetch the current or previous logs of one container.
pub struct LogsTask {
    runner: Arc<dyn Runner>,
    config: Arc<CollectConfig>,
    resource: LoggableResource,
    previous: bool,
}

impl LogsTask {
    pub fn current(runner: Arc<dyn Runner>, config: Arc<CollectConfig>, resource: LoggableResource) -> Self {
        Self {
            runner,
            config,
            resource,
            previous: false,
        }
    }

    pub fn previous(runner: Arc<dyn Runner>, config: Arc<CollectConfig>, resource: LoggableResource) -> Self {
        Self {
            previous: true,
            ..Self::current(runner, config, resource)
        }
    }

    fn command(&self) -> Command {
        let mut command = self
            .config
            .oc_in(&self.resource.project)
            .args(["logs".to_string(), self.resource.target()]);
        if !self.resource.container.is_empty() {
            command = command.args(["-c", self.resource.container.as_str()]);
        }
        command = command
            .arg("--tail")
            .arg(self.config.max_log_lines.to_string());
        if self.previous {
            command = command.arg("--previous");
        }
        command
    }

    fn path(&self) -> String {
        let what = if self.previous { "logs-previous" } else { "logs" };
        layout::logs(&self.resource.project, what, &self.resource.file_stem())
    }
}

#[async_trait]
impl Task for LogsTask {
    fn describe(&self) -> String {
        format!("{} > {}", self.command(), self.path())
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        // Previous logs are missing for any container that never restarted.
        self.runner
            .run(&self.command(), &self.path())
            .await
            .ignorable()
    }
}

/// List the resources of one kind in a project and queue log tasks for
/// each of them, per container for pods.
pub struct LogDiscoveryTask {
    runner: Arc<dyn Runner>,
    config: Arc<CollectConfig>,
    project: String,
    rtype: String,
    tasks: TaskSender,
}

impl LogDiscoveryTask {
    pub fn new(
        runner: Arc<dyn Runner>,
        config: Arc<CollectConfig>,
        project: impl Into<String>,
        rtype: impl Into<String>,
        tasks: TaskSender,
    ) -> Self {
        Self {
            runner,
            config,
            project: project.into(),
            rtype: rtype.into(),
            tasks,
        }
    }

    async fn resource_names(&self) -> Result<Vec<String>, TaskError> {
        let command = self.config.oc_in(&self.project).args([
            "get",
            self.rtype.as_str(),
            "-o=jsonpath={.items[*].metadata.name}",
        ]);
        let path = layout::resource_names(&self.project, &self.rtype);
        let out = self.runner.run_captured(&command, &path).await.fatal()?;
        Ok(read_words(&out))
    }

    async fn pod_containers(&self, pod: &str) -> Result<Vec<String>, TaskError> {
        let command = self.config.oc_in(&self.project).args([
            "get",
            "pod",
            pod,
            "-o=jsonpath={.spec.containers[*].name}",
        ]);
        let path = layout::container_names(&self.project, pod);
        let out = self.runner.run_captured(&command, &path).await.fatal()?;
        Ok(read_words(&out))
    }

    fn queue(&self, task: BoxedTask) -> Result<(), TaskError> {
        self.tasks
            .send(task)
            .map_err(|_| TaskError::fatal(anyhow::anyhow!("task queue is closed")))
    }
}

#[async_trait]
impl Task for LogDiscoveryTask {
    fn describe(&self) -> String {
        format!("discover {} logs in project {}", self.rtype, self.project)
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        let mut errors = ErrorList::new();
        let names = self.resource_names().await?;

        for name in names {
            // Resources other than pods are treated as a single unnamed
            // container.
            let containers = if is_pod_type(&self.rtype) {
                match errors.record(self.pod_containers(&name).await) {
                    Some(containers) => containers,
                    None => continue,
                }
            } else {
                vec![String::new()]
            };

            for container in containers {
                let resource = LoggableResource {
                    project: self.project.clone(),
                    rtype: self.rtype.clone(),
                    name: name.clone(),
                    container,
                };
                debug!("Queueing logs of {}", resource.file_stem());

                let current = LogsTask::current(
                    Arc::clone(&self.runner),
                    Arc::clone(&self.config),
                    resource.clone(),
                );
                let previous =
                    LogsTask::previous(Arc::clone(&self.runner), Arc::clone(&self.config), resource);
                errors.record(self.queue(Box::new(current)));
                errors.record(self.queue(Box::new(previous)));
            }
        }

        errors.into_task_result()
    }
}
