//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.ocdump.toml` files.

use crate::tasks::{CollectConfig, DEFAULT_MAX_LOG_LINES};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".ocdump.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Collection settings.
    #[serde(default)]
    pub collect: CollectSection,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Base directory for dumps.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Number of concurrent tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Stream output straight into the archive.
    #[serde(default)]
    pub archive: bool,

    /// Run the analysis after collecting.
    #[serde(default = "default_true")]
    pub analysis: bool,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            archive: false,
            analysis: true,
            verbose: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("ocdumps")
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_true() -> bool {
    true
}

/// What gets collected from the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectSection {
    /// The OpenShift CLI binary.
    #[serde(default = "default_oc")]
    pub oc: String,

    /// Max log lines fetched per container.
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,

    /// Resource kinds whose definitions are dumped.
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,

    /// Resource kinds whose logs are dumped.
    #[serde(default = "default_resources_with_logs")]
    pub resources_with_logs: Vec<String>,
}

impl Default for CollectSection {
    fn default() -> Self {
        let collect = CollectConfig::default();
        Self {
            oc: collect.oc,
            max_log_lines: collect.max_log_lines,
            resources: collect.resources,
            resources_with_logs: collect.resources_with_logs,
        }
    }
}

fn default_oc() -> String {
    CollectConfig::default().oc
}

fn default_max_log_lines() -> usize {
    DEFAULT_MAX_LOG_LINES
}

fn default_resources() -> Vec<String> {
    CollectConfig::default().resources
}

fn default_resources_with_logs() -> Vec<String> {
    CollectConfig::default().resources_with_logs
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.clone();
        }
        if let Some(max) = args.max_log_lines {
            self.collect.max_log_lines = max;
        }
        if let Some(ref oc) = args.oc {
            self.collect.oc = oc.clone();
        }

        // Flags always override
        if args.archive {
            self.general.archive = true;
        }
        if args.no_analysis {
            self.general.analysis = false;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject settings no run can start with. Checked after merging, so
    /// values from the file get the same treatment as flags.
    pub fn validate(&self) -> Result<()> {
        if self.general.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }
        if self.collect.max_log_lines == 0 {
            bail!("max_log_lines must be at least 1");
        }
        if self.collect.oc.trim().is_empty() {
            bail!("the oc binary must not be empty");
        }
        Ok(())
    }

    /// The collection settings handed to the tasks.
    pub fn collect_config(&self) -> CollectConfig {
        CollectConfig {
            oc: self.collect.oc.clone(),
            resources: self.collect.resources.clone(),
            resources_with_logs: self.collect.resources_with_logs.clone(),
            max_log_lines: self.collect.max_log_lines,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.concurrency >= 1);
        assert!(config.general.analysis);
        assert_eq!(config.collect.oc, "oc");
        assert_eq!(config.collect.max_log_lines, 1000);
        assert!(config.collect.resources.contains(&"events".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output_dir = "/var/tmp/dumps"
concurrency = 2
archive = true

[collect]
max_log_lines = 10
resources = ["pods", "events"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output_dir, PathBuf::from("/var/tmp/dumps"));
        assert_eq!(config.general.concurrency, 2);
        assert!(config.general.archive);
        assert_eq!(config.collect.max_log_lines, 10);
        assert_eq!(config.collect.resources, vec!["pods", "events"]);
        assert_eq!(config.collect.resources_with_logs, vec!["deploymentconfigs", "pods"]);
    }

    #[test]
    fn test_args_override_config() {
        let mut config: Config = toml::from_str("[general]\nconcurrency = 2\n").unwrap();
        let args = Args::try_parse_from(["ocdump", "-p", "7", "--no-analysis", "--oc", "/opt/oc"]).unwrap();

        config.merge_with_args(&args);

        assert_eq!(config.general.concurrency, 7);
        assert!(!config.general.analysis);
        let collect = config.collect_config();
        assert_eq!(collect.oc, "/opt/oc");
        assert_eq!(collect.max_log_lines, 1000);
    }

    #[test]
    fn test_unset_args_keep_config() {
        let mut config: Config = toml::from_str("[collect]\nmax_log_lines = 5\n").unwrap();
        let args = Args::try_parse_from(["ocdump"]).unwrap();

        config.merge_with_args(&args);
        assert_eq!(config.collect.max_log_lines, 5);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency_from_file() {
        let mut config: Config = toml::from_str("[general]\nconcurrency = 0\n").unwrap();
        config.merge_with_args(&Args::try_parse_from(["ocdump"]).unwrap());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));

        config.merge_with_args(&Args::try_parse_from(["ocdump", "-p", "2"]).unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_log_lines() {
        let config: Config = toml::from_str("[collect]\nmax_log_lines = 0\n").unwrap();
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[collect]"));

        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.collect.resources, Config::default().collect.resources);
    }
}
