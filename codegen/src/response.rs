//! Defensive parsing of backend responses.
//!
//! The backend is asked for a bare `{"files": {...}}` object but routinely
//! wraps it in markdown fences or surrounds it with prose. Parsing tries, in
//! order: the body of a fenced block, the whole text, and finally the widest
//! `{ ... "files" ... }` substring.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::files::GeneratedFileSet;

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("JSON_FENCE_RE regex should compile")
});

static ANY_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```\s*(\{.*?\})\s*```").expect("ANY_FENCE_RE regex should compile")
});

static FILES_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{.*"files".*\}"#).expect("FILES_OBJECT_RE regex should compile")
});

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("response JSON is not an object")]
    NotAnObject,

    #[error("response contains no files")]
    NoFiles,
}

/// Extract the generated files from a backend response.
pub fn parse_files_response(text: &str) -> Result<GeneratedFileSet, ParseError> {
    let candidate = unfence(text.trim());

    let value: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(e) => {
            let embedded = FILES_OBJECT_RE.find(candidate).ok_or(ParseError::NotJson(e))?;
            let value: Value = serde_json::from_str(embedded.as_str())?;
            return match value.get("files") {
                Some(Value::Object(files)) => to_file_set(files),
                _ => Err(ParseError::NoFiles),
            };
        }
    };

    match value {
        Value::Object(mut object) => match object.remove("files") {
            Some(Value::Object(files)) => to_file_set(&files),
            Some(_) => Err(ParseError::NoFiles),
            None => to_file_set(&object),
        },
        _ => Err(ParseError::NotAnObject),
    }
}

/// Strip a markdown fence around the JSON object, if there is one.
fn unfence(text: &str) -> &str {
    let fence = if text.contains("```json") {
        &*JSON_FENCE_RE
    } else if text.contains("```") {
        &*ANY_FENCE_RE
    } else {
        return text;
    };

    fence
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str())
}

/// String values are file contents; anything else is committed as pretty JSON.
fn to_file_set(files: &Map<String, Value>) -> Result<GeneratedFileSet, ParseError> {
    let mut set = GeneratedFileSet::new();
    for (path, content) in files {
        let text = match content {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other)?,
        };
        set.insert(path.clone(), text);
    }

    if set.is_empty() {
        return Err(ParseError::NoFiles);
    }
    Ok(set)
}
