//! Discovery of the capture work for a cluster.

use super::{CaptureTask, CollectConfig, Component, ComponentDiscoveryTask, DefinitionsTask, LogDiscoveryTask};
use crate::layout;
use crate::pool::{BoxedTask, TaskSender};
use crate::runner::Runner;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Cluster-wide metadata commands, as `oc` arguments.
const CLUSTER_META: &[&[&str]] = &[
    &["version"],
    &["whoami"],
    &["policy", "can-i", "list", "projects"],
    &["policy", "can-i", "list", "persistentvolumes"],
    &["policy", "can-i", "list", "nodes"],
];

/// Produces every capture task of a run.
pub struct Enumerator {
    runner: Arc<dyn Runner>,
    config: Arc<CollectConfig>,
}

impl Enumerator {
    pub fn new(runner: Arc<dyn Runner>, config: Arc<CollectConfig>) -> Self {
        Self { runner, config }
    }

    /// Names of the projects visible to the current user. Without them
    /// there is nothing to collect, so failure here ends the run.
    pub async fn projects(&self) -> Result<Vec<String>> {
        let command = self
            .config
            .oc()
            .args(["get", "projects", "-o=jsonpath={.items[*].metadata.name}"]);
        let out = self
            .runner
            .run_captured(&command, &layout::project_names())
            .await
            .context("Could not list projects")?;

        let projects = super::read_words(&out);
        info!("Found {} project(s)", projects.len());
        debug!("Projects: {:?}", projects);
        Ok(projects)
    }

    /// Send the capture tasks for `projects` into `tasks`. Returns the
    /// number of tasks sent; log tasks are queued later by the discovery
    /// tasks themselves.
    pub fn enumerate(&self, projects: &[String], tasks: &TaskSender) -> Result<usize> {
        let mut sent = 0;
        let mut send = |task: BoxedTask| -> Result<()> {
            if tasks.send(task).is_err() {
                bail!("task queue is closed");
            }
            sent += 1;
            Ok(())
        };

        for project in projects {
            send(Box::new(DefinitionsTask::new(
                Arc::clone(&self.runner),
                Arc::clone(&self.config),
                project.as_str(),
            )))?;
        }

        for project in projects {
            for rtype in &self.config.resources_with_logs {
                send(Box::new(LogDiscoveryTask::new(
                    Arc::clone(&self.runner),
                    Arc::clone(&self.config),
                    project.as_str(),
                    rtype.as_str(),
                    tasks.clone(),
                )))?;
            }
        }

        for component in Component::ALL {
            send(Box::new(ComponentDiscoveryTask::new(
                Arc::clone(&self.runner),
                Arc::clone(&self.config),
                projects.to_vec(),
                component,
                tasks.clone(),
            )))?;
        }

        for args in CLUSTER_META {
            send(Box::new(
                CaptureTask::new(
                    Arc::clone(&self.runner),
                    self.config.oc().args(args.iter().copied()),
                    layout::cluster_meta(args),
                )
                .ignorable(),
            ))?;
        }

        for project in projects {
            let args = ["-n", project.as_str(), "policy", "can-i", "--list"];
            send(Box::new(
                CaptureTask::new(
                    Arc::clone(&self.runner),
                    self.config.oc().args(args),
                    layout::project_meta(project, &args),
                )
                .ignorable(),
            ))?;
        }

        send(Box::new(
            CaptureTask::new(
                Arc::clone(&self.runner),
                self.config.oc().args(["adm", "diagnostics"]),
                layout::diagnostics(),
            )
            .ignorable(),
        ))?;

        debug!("Enumerated {} task(s)", sent);
        Ok(sent)
    }
}

/// Whether `program` resolves to a file, directly or through `PATH`.
fn command_on_path(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .any(|dir| dir.join(program).is_file())
}

/// Make sure the cluster CLI is installed and logged in before any work
/// starts.
pub async fn check_prerequisites(oc: &str) -> Result<()> {
    if !command_on_path(oc) {
        bail!(
            "{} command not found, please install the OpenShift CLI before using this tool",
            oc
        );
    }

    // Doubles as a ping: the server must be reachable and a user logged in.
    let status = tokio::process::Command::new(oc)
        .arg("whoami")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .with_context(|| format!("Failed to run {} whoami", oc))?;
    if !status.success() {
        bail!(
            "could not access OpenShift, please run '{} login' and make sure that a user is logged in and the server is accessible",
            oc
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;
    use tokio::sync::mpsc;

    fn enumerator(runner: Arc<FakeRunner>) -> Enumerator {
        Enumerator::new(runner, Arc::new(CollectConfig::default()))
    }

    #[tokio::test]
    async fn test_projects_listed() {
        let runner = Arc::new(FakeRunner::new().respond(
            "oc get projects -o=jsonpath={.items[*].metadata.name}",
            "dev prod\n",
        ));

        let projects = enumerator(runner.clone()).projects().await.unwrap();

        assert_eq!(projects, vec!["dev", "prod"]);
        assert_eq!(runner.calls()[0].path, "project-names");
    }

    #[tokio::test]
    async fn test_projects_failure_is_an_error() {
        let runner = Arc::new(FakeRunner::new().fail(
            "oc get projects -o=jsonpath={.items[*].metadata.name}",
            "Unauthorized",
        ));

        let err = enumerator(runner).projects().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Unauthorized"));
    }

    #[test]
    fn test_enumerate_sends_every_task() {
        let runner = Arc::new(FakeRunner::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let projects = vec!["dev".to_string(), "prod".to_string()];

        let sent = enumerator(runner).enumerate(&projects, &tx).unwrap();
        drop(tx);

        // 2 definitions + 2x2 log discoveries + 2 component discoveries
        // + 5 cluster meta + 2 project meta + diagnostics
        assert_eq!(sent, 16);
        let mut described = Vec::new();
        while let Ok(task) = rx.try_recv() {
            described.push(task.describe());
        }
        assert_eq!(described.len(), sent);
        assert!(described.contains(&"definitions of project prod".to_string()));
        assert!(described.contains(&"discover pods logs in project dev".to_string()));
        assert!(described.contains(&"discover nagios pods in 2 project(s)".to_string()));
        assert!(described.contains(&"discover millicore pods in 2 project(s)".to_string()));
        assert!(described.contains(
            &"oc policy can-i list nodes > meta/oc_policy_can-i_list_nodes".to_string()
        ));
        assert!(described.contains(
            &"oc -n dev policy can-i --list > meta/projects/dev/oc_-n_dev_policy_can-i_--list"
                .to_string()
        ));
        assert!(described.contains(&"oc adm diagnostics > oc_adm_diagnostics".to_string()));
    }

    #[test]
    fn test_enumerate_closed_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let result = enumerator(Arc::new(FakeRunner::new())).enumerate(&["dev".to_string()], &tx);
        assert!(result.is_err());
    }

    #[test]
    fn test_command_on_path() {
        assert!(!command_on_path("/nonexistent/ocdump-test-binary"));
        assert!(!command_on_path("ocdump-test-binary-that-does-not-exist"));
        #[cfg(unix)]
        assert!(command_on_path("sh"));
    }

    #[tokio::test]
    async fn test_prerequisites_missing_binary() {
        let err = check_prerequisites("ocdump-test-binary-that-does-not-exist")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("command not found"));
    }
}
