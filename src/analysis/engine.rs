//! Evaluation of the check registry against captured definitions.

use super::checks::Check;
use crate::errors::TaskError;
use crate::layout;
use crate::models::{AnalysisResult, CheckResult, ProjectResult};
use crate::output::{OutputSink, SinkError};
use crate::pool::{BoxedTask, Task, TaskOutcome, WorkerPool};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not load {kind} of project {project}: {source}")]
    Unavailable {
        project: String,
        kind: String,
        source: SinkError,
    },

    #[error("no {kind} of project {project} were captured")]
    Empty { project: String, kind: String },
}

/// Loads the captured collection of one resource kind.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, project: &str, kind: &str) -> Result<Vec<u8>, FetchError>;
}

/// Reads definitions back from the sink they were dumped to.
pub struct SinkFetcher {
    sink: Arc<dyn OutputSink>,
}

impl SinkFetcher {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }
}

impl ResourceFetcher for SinkFetcher {
    /// A failed `oc get` still leaves its (empty) destination behind, so
    /// a blank capture is reported as missing.
    fn fetch(&self, project: &str, kind: &str) -> Result<Vec<u8>, FetchError> {
        let raw = self
            .sink
            .read(&layout::definitions(project, kind))
            .map_err(|source| FetchError::Unavailable {
                project: project.to_string(),
                kind: kind.to_string(),
                source,
            })?;

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::Empty {
                project: project.to_string(),
                kind: kind.to_string(),
            });
        }
        Ok(raw)
    }
}

/// Runs a fixed list of checks per project.
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    checks: Vec<Check>,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new(Check::ALL.to_vec())
    }
}

impl AnalysisEngine {
    pub fn new(checks: Vec<Check>) -> Self {
        Self { checks }
    }

    /// Evaluate every check for `project`. A check whose input cannot be
    /// loaded or decoded is reported as failed; the others still run.
    pub fn analyze_project(&self, fetcher: &dyn ResourceFetcher, project: &str) -> ProjectResult {
        let results = self
            .checks
            .iter()
            .map(|&check| {
                let outcome = fetcher
                    .fetch(project, check.resource_kind())
                    .map_err(|e| e.to_string())
                    .and_then(|raw| check.evaluate(&raw).map_err(|e| e.to_string()));

                match outcome {
                    Ok(result) => result,
                    Err(reason) => {
                        debug!("Check '{}' failed in {}: {}", check.name(), project, reason);
                        CheckResult::failed(check.name(), reason)
                    }
                }
            })
            .collect();

        ProjectResult {
            project: project.to_string(),
            results,
        }
    }
}

/// Analysis of one project, run on the worker pool.
pub struct AnalysisTask {
    engine: Arc<AnalysisEngine>,
    fetcher: Arc<dyn ResourceFetcher>,
    project: String,
    results: mpsc::UnboundedSender<ProjectResult>,
}

#[async_trait]
impl Task for AnalysisTask {
    fn describe(&self) -> String {
        format!("analyze project {}", self.project)
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        let AnalysisTask {
            engine,
            fetcher,
            project,
            results,
        } = *self;

        let bundle = tokio::task::spawn_blocking(move || {
            engine.analyze_project(fetcher.as_ref(), &project)
        })
        .await
        .map_err(|e| TaskError::fatal(anyhow::anyhow!("analysis aborted: {}", e)))?;

        results
            .send(bundle)
            .map_err(|_| TaskError::fatal(anyhow::anyhow!("analysis results are no longer collected")))
    }
}

/// Analyze every project on `pool`. Project bundles are kept in completion
/// order; the returned outcomes report tasks that could not deliver.
pub async fn run_analysis(
    engine: Arc<AnalysisEngine>,
    fetcher: Arc<dyn ResourceFetcher>,
    projects: &[String],
    pool: &WorkerPool,
) -> (AnalysisResult, Vec<TaskOutcome>) {
    info!("Analyzing {} project(s)", projects.len());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let tasks: Vec<BoxedTask> = projects
        .iter()
        .map(|project| {
            Box::new(AnalysisTask {
                engine: Arc::clone(&engine),
                fetcher: Arc::clone(&fetcher),
                project: project.clone(),
                results: tx.clone(),
            }) as BoxedTask
        })
        .collect();
    drop(tx);

    let outcomes = pool.run_all(tasks).await;

    let mut analysis = AnalysisResult::default();
    while let Some(bundle) = rx.recv().await {
        analysis.projects.push(bundle);
    }

    (analysis, outcomes)
}
