//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// ocdump - OpenShift cluster diagnostics dump
///
/// Collects resource definitions, logs and metadata from every project
/// visible to the logged in `oc` user, packages them into a single
/// .tar.gz and reports common problems found in the collected data.
///
/// Examples:
///   ocdump
///   ocdump -p 8 --max-log-lines 5000
///   ocdump --archive --output-dir /tmp/dumps
///   ocdump --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Number of tasks to run concurrently
    ///
    /// Defaults to the number of logical CPUs.
    #[arg(short = 'p', long, value_name = "NUM", env = "OCDUMP_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Max number of log lines fetched per container with oc logs
    #[arg(long, value_name = "LINES")]
    pub max_log_lines: Option<usize>,

    /// Base directory for dumps
    ///
    /// Every run creates a timestamped dump below it.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Stream output straight into the archive instead of a directory tree
    #[arg(long)]
    pub archive: bool,

    /// The OpenShift CLI binary to use
    #[arg(long, value_name = "PATH", env = "OCDUMP_OC")]
    pub oc: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .ocdump.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Skip the analysis of the collected data
    #[arg(long)]
    pub no_analysis: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .ocdump.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.concurrency == Some(0) {
            return Err("argument to -p flag must be greater than 0".to_string());
        }

        if self.max_log_lines == Some(0) {
            return Err("Max log lines must be at least 1".to_string());
        }

        if let Some(ref oc) = self.oc {
            if oc.trim().is_empty() {
                return Err("The oc binary must not be empty".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref dir) = self.output_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(format!(
                    "Output path is not a directory: {}",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            concurrency: None,
            max_log_lines: None,
            output_dir: None,
            archive: false,
            oc: None,
            config: None,
            no_analysis: false,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "ocdump",
            "-p",
            "3",
            "--max-log-lines",
            "20",
            "--archive",
            "--output-dir",
            "/tmp/dumps",
        ])
        .unwrap();

        assert_eq!(args.concurrency, Some(3));
        assert_eq!(args.max_log_lines, Some(20));
        assert!(args.archive);
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/dumps")));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let mut args = make_args();
        args.concurrency = Some(0);
        let err = args.validate().unwrap_err();
        assert!(err.contains("greater than 0"));
    }

    #[test]
    fn test_validation_zero_log_lines() {
        let mut args = make_args();
        args.max_log_lines = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_init_config_skips_validation() {
        let mut args = make_args();
        args.concurrency = Some(0);
        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
