//! Rule-based analysis of a finished dump.
//!
//! Analysis reads project definitions back from the output sink after the
//! capture pool has drained and evaluates [`checks::Check::ALL`] per project.

pub mod checks;
pub mod engine;

pub use engine::{run_analysis, AnalysisEngine, SinkFetcher};
