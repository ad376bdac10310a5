//! Files copied out of well-known application pods.
//!
//! Some RHMAP components keep their state inside the pod rather than in
//! logs: Nagios its status and check history, Millicore its cluster
//! configuration. Pods are recognized by name and the files are fetched
//! with `oc exec`.

use super::{read_words, CaptureTask, CollectConfig};
use crate::errors::{ErrorList, SeverityExt, TaskError};
use crate::layout;
use crate::pool::{Task, TaskSender};
use crate::runner::{Command, Runner};
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const NAGIOS_MISSING: &str = "A Nagios pod could not be found in any project. For a more thorough \
analysis, please ensure Nagios is running in all RHMAP projects.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Nagios,
    Millicore,
}

impl Component {
    pub const ALL: [Component; 2] = [Component::Nagios, Component::Millicore];

    /// Substring identifying the component's pods.
    pub fn marker(self) -> &'static str {
        match self {
            Component::Nagios => "nagios",
            Component::Millicore => "millicore",
        }
    }

    /// Whether a cluster without any such pod is worth reporting.
    fn expected(self) -> bool {
        matches!(self, Component::Nagios)
    }

    /// The `oc exec` commands and destinations for one pod.
    pub fn captures(self, config: &CollectConfig, project: &str, pod: &str) -> Vec<(Command, String)> {
        let exec = || config.oc_in(project).args(["exec", pod, "--"]);
        match self {
            Component::Nagios => vec![
                (
                    exec().args(["cat", "/var/log/nagios/status.dat"]),
                    layout::component_file(project, "nagios", pod, "status.dat"),
                ),
                (
                    exec().args(["tar", "-c", "-C", "/var/log/nagios", "archives"]),
                    layout::component_file(project, "nagios", pod, "history.tar"),
                ),
            ],
            Component::Millicore => vec![(
                exec().args(["cat", "/etc/feedhenry/cluster-override.properties"]),
                layout::component_file(project, "millicore", pod, "cluster-override.properties"),
            )],
        }
    }
}

/// Find the pods of one component across all projects and queue the
/// captures of their files.
pub struct ComponentDiscoveryTask {
    runner: Arc<dyn Runner>,
    config: Arc<CollectConfig>,
    projects: Vec<String>,
    component: Component,
    tasks: TaskSender,
}

impl ComponentDiscoveryTask {
    pub fn new(
        runner: Arc<dyn Runner>,
        config: Arc<CollectConfig>,
        projects: Vec<String>,
        component: Component,
        tasks: TaskSender,
    ) -> Self {
        Self {
            runner,
            config,
            projects,
            component,
            tasks,
        }
    }

    async fn matching_pods(&self, project: &str) -> Result<Vec<String>, TaskError> {
        let command = self.config.oc_in(project).args([
            "get",
            "pods",
            "-o=jsonpath={.items[*].metadata.name}",
        ]);
        let path = layout::matching_pods(project, self.component.marker());
        let out = self.runner.run_captured(&command, &path).await.fatal()?;

        let mut pods = read_words(&out);
        pods.retain(|pod| pod.contains(self.component.marker()));
        Ok(pods)
    }
}

#[async_trait]
impl Task for ComponentDiscoveryTask {
    fn describe(&self) -> String {
        format!(
            "discover {} pods in {} project(s)",
            self.component.marker(),
            self.projects.len()
        )
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        let mut errors = ErrorList::new();
        let mut found = false;

        for project in &self.projects {
            let Some(pods) = errors.record(self.matching_pods(project).await) else {
                continue;
            };

            for pod in pods {
                found = true;
                for (command, path) in self.component.captures(&self.config, project, &pod) {
                    debug!("Queueing {}", path);
                    let task = CaptureTask::new(Arc::clone(&self.runner), command, path);
                    if self.tasks.send(Box::new(task)).is_err() {
                        errors.push(TaskError::fatal(anyhow!("task queue is closed")));
                    }
                }
            }
        }

        if !found && self.component.expected() {
            errors.push(TaskError::fatal(anyhow!(NAGIOS_MISSING)));
        }

        errors.into_task_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;
    use tokio::sync::mpsc;

    fn projects(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn discover(
        runner: Arc<FakeRunner>,
        names: &[&str],
        component: Component,
    ) -> (Result<(), TaskError>, Vec<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = ComponentDiscoveryTask::new(
            runner,
            Arc::new(CollectConfig::default()),
            projects(names),
            component,
            tx,
        );
        let result = Box::new(task).execute().await;

        let mut queued = Vec::new();
        while let Some(task) = rx.recv().await {
            queued.push(task.describe());
        }
        (result, queued)
    }

    #[test]
    fn test_nagios_captures() {
        let captures = Component::Nagios.captures(&CollectConfig::default(), "test-project", "pod");
        let lines: Vec<(String, String)> = captures
            .into_iter()
            .map(|(cmd, path)| (cmd.to_string(), path))
            .collect();

        assert_eq!(
            lines,
            vec![
                (
                    "oc -n test-project exec pod -- cat /var/log/nagios/status.dat".to_string(),
                    "projects/test-project/nagios/pod_status.dat".to_string(),
                ),
                (
                    "oc -n test-project exec pod -- tar -c -C /var/log/nagios archives".to_string(),
                    "projects/test-project/nagios/pod_history.tar".to_string(),
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_nagios_pod_is_reported() {
        let (result, queued) = discover(Arc::new(FakeRunner::new()), &[], Component::Nagios).await;

        let err = result.unwrap_err();
        assert!(!err.is_ignorable());
        assert!(err.to_string().contains("Nagios pod could not be found"));
        assert!(queued.is_empty());
    }

    #[tokio::test]
    async fn test_nagios_pods_matched_by_name() {
        let runner = Arc::new(
            FakeRunner::new()
                .respond(
                    "oc -n core get pods -o=jsonpath={.items[*].metadata.name}",
                    "nagios-1-abcde mysql-1-x",
                )
                .respond(
                    "oc -n mbaas get pods -o=jsonpath={.items[*].metadata.name}",
                    "mongodb-1",
                ),
        );

        let (result, queued) = discover(runner.clone(), &["core", "mbaas"], Component::Nagios).await;

        result.unwrap();
        assert_eq!(
            queued,
            vec![
                "oc -n core exec nagios-1-abcde -- cat /var/log/nagios/status.dat > projects/core/nagios/nagios-1-abcde_status.dat",
                "oc -n core exec nagios-1-abcde -- tar -c -C /var/log/nagios archives > projects/core/nagios/nagios-1-abcde_history.tar",
            ]
        );
        assert_eq!(runner.calls()[0].path, "projects/core/names/pods_matching_nagios");
    }

    #[tokio::test]
    async fn test_millicore_config_task() {
        let runner = Arc::new(FakeRunner::new().respond(
            "oc -n project1 get pods -o=jsonpath={.items[*].metadata.name}",
            "millicore-1",
        ));

        let (result, queued) = discover(runner, &["project1"], Component::Millicore).await;

        result.unwrap();
        assert_eq!(
            queued,
            vec![
                "oc -n project1 exec millicore-1 -- cat /etc/feedhenry/cluster-override.properties > projects/project1/millicore/millicore-1_cluster-override.properties",
            ]
        );
    }

    #[tokio::test]
    async fn test_millicore_absent_is_fine_but_listing_errors_are_not() {
        let (result, _) = discover(Arc::new(FakeRunner::new()), &["dev"], Component::Millicore).await;
        result.unwrap();

        let runner = Arc::new(FakeRunner::new().fail(
            "oc -n project1 get pods -o=jsonpath={.items[*].metadata.name}",
            "error retrieving pods",
        ));
        let (result, queued) = discover(runner, &["project1"], Component::Millicore).await;

        assert!(result.unwrap_err().to_string().contains("error retrieving pods"));
        assert!(queued.is_empty());
    }
}
