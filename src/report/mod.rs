//! Report output.

pub mod generator;

pub use generator::{generate_json_report, write_text};
