//! Data models for the dump tool.
//!
//! This module contains the cluster records read back during analysis and
//! the check results produced from them. Cluster records are simplified
//! Kubernetes/OpenShift API objects: only the fields the checks look at are
//! modeled. Events are the exception, they are kept whole for the report.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Message of a check that found nothing.
pub const NOT_DETECTED: &str = "this issue was not detected";

// ============================================================================
// Cluster records
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// A report of something that happened in the cluster.
///
/// Only `type` is interpreted. Every other field is carried as decoded so
/// a flagged event lands in the report as the complete record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn event_type(&self) -> &str {
        self.event_type.as_deref().unwrap_or_default()
    }

    fn text(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn reason(&self) -> &str {
        self.text("reason")
    }

    pub fn message(&self) -> &str {
        self.text("message")
    }

    /// The object the event is about, if the record names one.
    pub fn involved_object(&self) -> Option<ObjectReference> {
        self.fields
            .get("involvedObject")
            .and_then(|v| ObjectReference::deserialize(v).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventList {
    pub items: Vec<Event>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodStatus {
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerState {
    /// Present (non-null) only while the container is waiting.
    pub waiting: Option<ContainerStateWaiting>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerStateWaiting {
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodList {
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: DeploymentConfigSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfigSpec {
    /// `None` when the definition does not declare a replica count.
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfigList {
    pub items: Vec<DeploymentConfig>,
}

// ============================================================================
// Check results
// ============================================================================

/// Outcome class of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// The condition was not found.
    Ok,
    /// The condition was found at least once.
    Detected,
    /// The check could not run, e.g. its resource failed to load.
    Failed,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Ok => write!(f, "ok"),
            CheckStatus::Detected => write!(f, "detected"),
            CheckStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Details about one flagged resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Info {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub count: i32,
    pub message: String,
}

/// Outcome of one check over one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub check_name: String,
    pub status: CheckStatus,
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<Info>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

impl CheckResult {
    /// The default outcome: nothing detected.
    pub fn not_detected(check_name: &str) -> Self {
        Self {
            check_name: check_name.to_string(),
            status: CheckStatus::Ok,
            ok: true,
            message: NOT_DETECTED.to_string(),
            info: Vec::new(),
            events: Vec::new(),
        }
    }

    /// A check that could not be evaluated.
    pub fn failed(check_name: &str, reason: impl fmt::Display) -> Self {
        Self {
            check_name: check_name.to_string(),
            status: CheckStatus::Failed,
            ok: false,
            message: format!("failed to execute: {}", reason),
            info: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Mark the condition as detected. There is no way back to ok.
    pub fn detect(&mut self, message: &str) {
        self.ok = false;
        self.status = CheckStatus::Detected;
        self.message = message.to_string();
    }
}

/// All check results of one project, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectResult {
    pub project: String,
    #[serde(rename = "checks")]
    pub results: Vec<CheckResult>,
}

/// The aggregated analysis report of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Cluster-wide checks. No built-in check populates this yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platform: Vec<CheckResult>,
    #[serde(default)]
    pub projects: Vec<ProjectResult>,
}

impl AnalysisResult {
    /// True when any scope holds a result that is not ok.
    pub fn has_issues(&self) -> bool {
        self.platform.iter().any(|r| !r.ok)
            || self
                .projects
                .iter()
                .flat_map(|p| &p.results)
                .any(|r| !r.ok)
    }
}
