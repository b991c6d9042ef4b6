//! Generation strategy selection.
//!
//! The choice is a pure function of the brief and the attachment names so it
//! can be inspected (and tested) without decoding or generating anything.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

const SOURCE_EXTENSIONS: [&str; 1] = ["py"];
const SPREADSHEET_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];
const CI_TERMS: [&str; 3] = ["github actions", "workflow", "ci.yml"];

/// How the files for a task are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    /// Deterministic: fix up attached source, convert spreadsheets, add a CI
    /// workflow. Never calls the backend.
    DataPipeline,
    /// Ask the generative backend, falling back to fixed templates.
    General,
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataPipeline => write!(f, "data_pipeline"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Pick a strategy for `brief` given the attachment names.
///
/// `DataPipeline` applies when there is at least one source file and either a
/// spreadsheet or a brief that talks about CI.
pub fn classify<S: AsRef<str>>(brief: &str, attachment_names: &[S]) -> GenerationStrategy {
    let has_source = attachment_names
        .iter()
        .any(|n| has_extension(n.as_ref(), &SOURCE_EXTENSIONS));
    let has_spreadsheet = attachment_names
        .iter()
        .any(|n| has_extension(n.as_ref(), &SPREADSHEET_EXTENSIONS));

    if has_source && (has_spreadsheet || mentions_ci(brief)) {
        GenerationStrategy::DataPipeline
    } else {
        GenerationStrategy::General
    }
}

pub fn is_source_file(name: &str) -> bool {
    has_extension(name, &SOURCE_EXTENSIONS)
}

pub fn is_spreadsheet(name: &str) -> bool {
    has_extension(name, &SPREADSHEET_EXTENSIONS)
}

fn mentions_ci(brief: &str) -> bool {
    let lower = brief.to_lowercase();
    CI_TERMS.iter().any(|term| lower.contains(term))
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}
