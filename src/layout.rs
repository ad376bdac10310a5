//! Canonical layout of a dump.
//!
//! All logical paths written during a run are built here so the tree on
//! disk and the entries in an archive always agree. Bump
//! [`LAYOUT_VERSION`] whenever a path shape changes.

/// Version of the path layout below, recorded in every dump.
pub const LAYOUT_VERSION: u32 = 1;

pub const VERSION_FILE: &str = "version";
pub const ANALYSIS_FILE: &str = "analysis.json";
pub const LOG_FILE: &str = "dump.log";
pub const RUNS_DIR: &str = "runs";

/// Suffix appended to a destination to hold the command's stderr.
pub const STDERR_SUFFIX: &str = ".stderr";

pub fn project_names() -> String {
    "project-names".to_string()
}

pub fn definitions(project: &str, kind: &str) -> String {
    format!("projects/{}/definitions/{}.json", project, kind)
}

/// Whether `path` was built by [`definitions`].
pub fn is_definitions(path: &str) -> bool {
    matches!(
        path.split('/').collect::<Vec<_>>().as_slice(),
        ["projects", project, "definitions", file]
            if !project.is_empty() && file.len() > ".json".len() && file.ends_with(".json")
    )
}

pub fn resource_names(project: &str, kind: &str) -> String {
    format!("projects/{}/names/{}", project, kind)
}

pub fn container_names(project: &str, pod: &str) -> String {
    format!("projects/{}/pods/{}/container-names", project, pod)
}

/// Pod listing used to find the pods of one component.
pub fn matching_pods(project: &str, marker: &str) -> String {
    format!("projects/{}/names/pods_matching_{}", project, marker)
}

/// A file copied out of a component pod.
pub fn component_file(project: &str, component: &str, pod: &str, file: &str) -> String {
    format!("projects/{}/{}/{}_{}", project, component, pod, file)
}

/// `what` is `logs` or `logs-previous`.
pub fn logs(project: &str, what: &str, file_stem: &str) -> String {
    format!("projects/{}/{}/{}.logs", project, what, file_stem)
}

pub fn cluster_meta(args: &[&str]) -> String {
    format!("meta/oc_{}", args.join("_"))
}

pub fn project_meta(project: &str, args: &[&str]) -> String {
    format!("meta/projects/{}/oc_{}", project, args.join("_"))
}

pub fn diagnostics() -> String {
    "oc_adm_diagnostics".to_string()
}

pub fn stderr_of(path: &str) -> String {
    format!("{}{}", path, STDERR_SUFFIX)
}

/// Contents of the `version` file.
pub fn version_text() -> String {
    format!(
        "ocdump {}\nlayout {}\n",
        env!("CARGO_PKG_VERSION"),
        LAYOUT_VERSION
    )
}
