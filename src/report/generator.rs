//! Analysis report generation.
//!
//! The text report lists every check that is not ok; the JSON report is the
//! full [`AnalysisResult`] and is written once per run.

use crate::models::{AnalysisResult, CheckResult, CheckStatus};
use anyhow::Result;
use std::io::{self, Write};

/// Printed instead of the report when every check is ok.
pub const NO_ISSUES: &str = "No issues found.";

const DETAIL_INDENT: &str = "    ";

/// Render the human-readable report.
pub fn render_text(analysis: &AnalysisResult) -> String {
    if !analysis.has_issues() {
        return format!("{}\n", NO_ISSUES);
    }

    let mut output = String::new();

    for result in &analysis.platform {
        output.push_str(&generate_check_block("platform", result));
    }

    for project in &analysis.projects {
        let scope = format!("project {}", project.project);
        for result in &project.results {
            output.push_str(&generate_check_block(&scope, result));
        }
    }

    output
}

/// Write the human-readable report to `out`.
pub fn write_text(out: &mut impl Write, analysis: &AnalysisResult) -> io::Result<()> {
    out.write_all(render_text(analysis).as_bytes())?;
    out.flush()
}

/// Generate the block of one check result; empty when it is ok.
fn generate_check_block(scope: &str, result: &CheckResult) -> String {
    if result.ok {
        return String::new();
    }

    let mut block = String::new();

    let heading = match result.status {
        CheckStatus::Failed => "Could not run check in",
        _ => "Potential issue discovered in",
    };
    block.push_str(&format!("{} {}: {}\n", heading, scope, result.check_name));
    block.push_str("  Details:\n");

    if result.status == CheckStatus::Failed {
        block.push_str(&detail_line(&result.message));
        return block;
    }

    for info in &result.info {
        block.push_str(&detail_line(&info.message));
    }
    for event in &result.events {
        block.push_str(&detail_line(event.message()));
    }

    block
}

/// One indented detail; continuation lines keep the indentation.
fn detail_line(message: &str) -> String {
    let indented = message
        .trim()
        .replace('\n', &format!("\n{}", DETAIL_INDENT));
    format!("{}{}\n", DETAIL_INDENT, indented)
}

/// Generate the JSON report.
pub fn generate_json_report(analysis: &AnalysisResult) -> Result<String> {
    serde_json::to_string_pretty(analysis).map_err(Into::into)
}
