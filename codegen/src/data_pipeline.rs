//! Data-pipeline strategy.
//!
//! Fully deterministic: attached source files are republished with a known
//! misspelling corrected, spreadsheets become CSV siblings, and a CI workflow
//! plus README describing it are synthesized. The backend is never consulted.

use tracing::{info, warn};

use crate::attachments::DecodedAttachment;
use crate::files::GeneratedFileSet;
use crate::spreadsheet::{csv_path_for, workbook_to_csv};
use crate::strategy::{is_source_file, is_spreadsheet};

pub const WORKFLOW_PATH: &str = ".github/workflows/ci.yml";

/// (wrong, right) pairs applied to every attached source file.
pub const SOURCE_CORRECTIONS: [(&str, &str); 1] = [("revenew", "revenue")];

const DEFAULT_ENTRYPOINT: &str = "execute.py";

pub fn generate(attachments: &[DecodedAttachment]) -> GeneratedFileSet {
    info!(attachments = attachments.len(), "Using data-pipeline strategy");
    let mut files = GeneratedFileSet::new();

    for att in attachments.iter().filter(|a| is_source_file(&a.name)) {
        match att.as_text() {
            Some(source) => {
                files.insert(att.name.clone(), correct_source(source));
                info!(name = %att.name, "Corrected source file");
            }
            None => warn!(name = %att.name, "Source attachment is not UTF-8, skipping"),
        }
    }

    let mut converted = Vec::new();
    for att in attachments.iter().filter(|a| is_spreadsheet(&a.name)) {
        match workbook_to_csv(&att.bytes) {
            Ok(csv) => {
                let csv_name = csv_path_for(&att.name);
                info!(from = %att.name, to = %csv_name, "Converted spreadsheet to CSV");
                files.insert(csv_name.clone(), csv);
                converted.push(csv_name);
            }
            Err(e) => warn!(name = %att.name, error = %e, "Failed to convert spreadsheet"),
        }
    }

    let entrypoint = attachments
        .iter()
        .map(|a| a.name.as_str())
        .find(|name| is_source_file(name))
        .unwrap_or(DEFAULT_ENTRYPOINT);

    files.insert(WORKFLOW_PATH, workflow_yaml(entrypoint));
    files.insert("README.md", readme(entrypoint, &converted));

    info!(files = files.len(), "Data-pipeline files ready");
    files
}

/// Apply [`SOURCE_CORRECTIONS`] everywhere they occur.
pub fn correct_source(source: &str) -> String {
    SOURCE_CORRECTIONS
        .iter()
        .fold(source.to_string(), |acc, (wrong, right)| acc.replace(wrong, right))
}

fn workflow_yaml(entrypoint: &str) -> String {
    format!(
        r#"name: CI

on:
  push:
    branches: [ main ]
  pull_request:
    branches: [ main ]

jobs:
  build:
    runs-on: ubuntu-latest

    steps:
    - uses: actions/checkout@v3

    - name: Set up Python
      uses: actions/setup-python@v4
      with:
        python-version: '3.11'

    - name: Install dependencies
      run: |
        python -m pip install --upgrade pip
        pip install ruff pandas

    - name: Run ruff linter
      run: |
        ruff check . || true

    - name: Run {entrypoint}
      run: |
        python {entrypoint} > result.json

    - name: Upload result.json
      uses: actions/upload-artifact@v3
      with:
        name: result
        path: result.json

    - name: Deploy to GitHub Pages
      uses: peaceiris/actions-gh-pages@v3
      with:
        github_token: ${{{{ secrets.GITHUB_TOKEN }}}}
        publish_dir: .
        publish_branch: gh-pages
"#
    )
}

fn readme(entrypoint: &str, csv_files: &[String]) -> String {
    let mut listing = format!("- `{entrypoint}`: Main analysis script (typo fixed)\n");
    for csv in csv_files {
        listing.push_str(&format!("- `{csv}`: Data file converted from Excel\n"));
    }
    listing.push_str(&format!("- `{WORKFLOW_PATH}`: GitHub Actions workflow\n"));

    format!(
        "# Analyze Task

## Overview
This project analyzes data using Python and automated CI/CD.

## Files
{listing}
## CI/CD Pipeline
The GitHub Actions workflow:
1. Runs ruff linter for code quality
2. Executes `{entrypoint}` to generate `result.json`
3. Deploys `result.json` to GitHub Pages

## Usage
Push to main branch to trigger the CI pipeline.

## Result
View the generated `result.json` on GitHub Pages after CI completes.
"
    )
}
