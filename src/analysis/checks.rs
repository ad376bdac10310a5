//! Built-in rule checks.
//!
//! Every check is a pure function over one decoded resource collection.
//! Checks scan the whole collection; a single match flips the result to
//! not-ok for good, later matches only add details.

use crate::models::{CheckResult, DeploymentConfigList, EventList, Info, PodList};
use serde::de::DeserializeOwned;

pub const EVENT_LOG_CHECK: &str = "check event log for errors";
pub const REPLICAS_CHECK: &str = "check number of replicas in deployment configs";
pub const WAITING_CONTAINERS_CHECK: &str = "check pods for containers in waiting state";

const REPLICAS_ZERO: &str = "the replica parameter is set to 0, this should be greater than 0";

/// Flag every event whose type is not exactly `Normal`.
pub fn check_event_log(events: &EventList) -> CheckResult {
    let mut result = CheckResult::not_detected(EVENT_LOG_CHECK);

    for event in &events.items {
        if event.event_type() != "Normal" {
            result.detect("some events in the event log are not of type Normal");
            result.events.push(event.clone());
        }
    }

    result
}

/// Flag every deployment config that declares zero replicas.
pub fn check_deployment_replicas(configs: &DeploymentConfigList) -> CheckResult {
    let mut result = CheckResult::not_detected(REPLICAS_CHECK);

    for dc in &configs.items {
        if dc.spec.replicas == Some(0) {
            result.detect("one or more deployment configs have 0 replicas");
            result.info.push(Info {
                name: dc.metadata.name.clone(),
                namespace: dc.metadata.namespace.clone(),
                kind: if dc.kind.is_empty() {
                    "DeploymentConfig".to_string()
                } else {
                    dc.kind.clone()
                },
                count: 1,
                message: REPLICAS_ZERO.to_string(),
            });
        }
    }

    result
}

/// Flag every pod with at least one container in waiting state.
pub fn check_waiting_containers(pods: &PodList) -> CheckResult {
    let mut result = CheckResult::not_detected(WAITING_CONTAINERS_CHECK);

    for pod in &pods.items {
        for status in &pod.status.container_statuses {
            let Some(waiting) = &status.state.waiting else {
                continue;
            };
            result.detect("one or more pods have containers in waiting state");

            let mut message = format!(
                "container {} in pod {} is in waiting state",
                status.name, pod.metadata.name
            );
            if !waiting.reason.is_empty() {
                message.push_str(&format!(": {}", waiting.reason));
            }
            if !waiting.message.is_empty() {
                message.push('\n');
                message.push_str(&waiting.message);
            }

            result.info.push(Info {
                name: status.name.clone(),
                namespace: pod.metadata.namespace.clone(),
                kind: "Pod".to_string(),
                count: 1,
                message,
            });
        }
    }

    result
}

/// The registry of checks, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    EventLog,
    DeploymentReplicas,
    WaitingContainers,
}

impl Check {
    pub const ALL: [Check; 3] = [
        Check::EventLog,
        Check::DeploymentReplicas,
        Check::WaitingContainers,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Check::EventLog => EVENT_LOG_CHECK,
            Check::DeploymentReplicas => REPLICAS_CHECK,
            Check::WaitingContainers => WAITING_CONTAINERS_CHECK,
        }
    }

    /// The resource kind this check reads, as captured under `definitions/`.
    pub fn resource_kind(self) -> &'static str {
        match self {
            Check::EventLog => "events",
            Check::DeploymentReplicas => "deploymentconfigs",
            Check::WaitingContainers => "pods",
        }
    }

    /// Decode `raw` as this check's resource collection and evaluate it.
    pub fn evaluate(self, raw: &[u8]) -> Result<CheckResult, serde_json::Error> {
        Ok(match self {
            Check::EventLog => check_event_log(&decode(raw)?),
            Check::DeploymentReplicas => check_deployment_replicas(&decode(raw)?),
            Check::WaitingContainers => check_waiting_containers(&decode(raw)?),
        })
    }
}

/// A capture without any JSON in it is not an empty collection: `oc get`
/// always prints a `List`, even when nothing matches.
fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckStatus, NOT_DETECTED};

    const EVENTS: &str = r#"{
        "kind": "List",
        "items": [
            {
                "kind": "Event",
                "involvedObject": {"kind": "Pod", "namespace": "dev", "name": "web-1"},
                "reason": "BackOff",
                "message": "Back-off restarting failed container",
                "count": 7,
                "type": "Warning"
            },
            {
                "kind": "Event",
                "involvedObject": {"kind": "Pod", "namespace": "dev", "name": "web-2"},
                "reason": "Started",
                "message": "Started container",
                "count": 1,
                "type": "Normal"
            }
        ]
    }"#;

    #[test]
    fn test_event_log_flags_non_normal() {
        let result = Check::EventLog.evaluate(EVENTS.as_bytes()).unwrap();

        assert!(!result.ok);
        assert_eq!(result.status, CheckStatus::Detected);
        assert_eq!(result.check_name, EVENT_LOG_CHECK);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].involved_object().unwrap().name, "web-1");
        assert_eq!(result.events[0].reason(), "BackOff");
    }

    #[test]
    fn test_event_log_all_normal() {
        let raw = r#"{"items": [{"kind": "Event", "type": "Normal"}]}"#;
        let result = Check::EventLog.evaluate(raw.as_bytes()).unwrap();

        assert!(result.ok);
        assert_eq!(result.message, NOT_DETECTED);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_flagged_event_keeps_full_record() {
        let raw = r#"{"items": [{
            "metadata": {"name": "web-1.15c", "namespace": "dev"},
            "source": {"component": "kubelet"},
            "lastTimestamp": "2024-01-01T01:00:00Z",
            "type": "Warning"
        }]}"#;
        let result = Check::EventLog.evaluate(raw.as_bytes()).unwrap();

        let json = serde_json::to_value(&result).unwrap();
        let event = &json["events"][0];
        assert_eq!(event["source"]["component"], "kubelet");
        assert_eq!(event["lastTimestamp"], "2024-01-01T01:00:00Z");
        assert_eq!(event["metadata"]["name"], "web-1.15c");
        assert!(event.get("involvedObject").is_none());
    }

    #[test]
    fn test_event_type_must_match_exactly() {
        let raw = r#"{"items": [{"type": "normal"}, {"type": ""}]}"#;
        let result = Check::EventLog.evaluate(raw.as_bytes()).unwrap();
        assert_eq!(result.events.len(), 2);
    }

    #[test]
    fn test_replicas_zero_flagged() {
        let raw = r#"{"items": [
            {"kind": "DeploymentConfig", "metadata": {"name": "idle", "namespace": "dev"}, "spec": {"replicas": 0}},
            {"kind": "DeploymentConfig", "metadata": {"name": "busy", "namespace": "dev"}, "spec": {"replicas": 3}}
        ]}"#;
        let result = Check::DeploymentReplicas.evaluate(raw.as_bytes()).unwrap();

        assert!(!result.ok);
        assert_eq!(
            result.info,
            vec![Info {
                name: "idle".to_string(),
                namespace: "dev".to_string(),
                kind: "DeploymentConfig".to_string(),
                count: 1,
                message: REPLICAS_ZERO.to_string(),
            }]
        );
    }

    #[test]
    fn test_replicas_missing_is_not_zero() {
        let raw = r#"{"items": [{"metadata": {"name": "dc"}, "spec": {}}]}"#;
        let result = Check::DeploymentReplicas.evaluate(raw.as_bytes()).unwrap();
        assert!(result.ok);
    }

    #[test]
    fn test_waiting_container_flagged() {
        let raw = r#"{"items": [
            {
                "metadata": {"name": "web-1", "namespace": "dev"},
                "status": {"containerStatuses": [
                    {"name": "app", "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off 5m0s"}}},
                    {"name": "sidecar", "state": {"running": {"startedAt": "2024-01-01T00:00:00Z"}}}
                ]}
            },
            {
                "metadata": {"name": "web-2", "namespace": "dev"},
                "status": {"containerStatuses": [
                    {"name": "app", "state": {"running": {}}}
                ]}
            }
        ]}"#;
        let result = Check::WaitingContainers.evaluate(raw.as_bytes()).unwrap();

        assert!(!result.ok);
        assert_eq!(result.info.len(), 1);
        let info = &result.info[0];
        assert_eq!(info.name, "app");
        assert_eq!(info.namespace, "dev");
        assert!(info.message.contains("app"));
        assert!(info.message.contains("web-1"));
        assert!(info.message.contains("CrashLoopBackOff"));
    }

    #[test]
    fn test_running_pods_are_ok() {
        let raw = r#"{"items": [
            {"metadata": {"name": "p"}, "status": {"containerStatuses": [{"name": "c", "state": {"running": {}}}]}}
        ]}"#;
        let result = Check::WaitingContainers.evaluate(raw.as_bytes()).unwrap();
        assert!(result.ok);
        assert!(result.info.is_empty());
    }

    #[test]
    fn test_empty_collections_are_ok() {
        for check in Check::ALL {
            let result = check.evaluate(br#"{"items": []}"#).unwrap();
            assert!(result.ok, "{}", check.name());
        }
    }

    #[test]
    fn test_empty_capture_is_an_error() {
        for check in Check::ALL {
            assert!(check.evaluate(b"").is_err(), "{}", check.name());
            assert!(check.evaluate(b" \n").is_err(), "{}", check.name());
        }
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(Check::EventLog.evaluate(b"not json").is_err());
    }

    #[test]
    fn test_registry_order() {
        let kinds: Vec<&str> = Check::ALL.iter().map(|c| c.resource_kind()).collect();
        assert_eq!(kinds, vec!["events", "deploymentconfigs", "pods"]);
    }
}
