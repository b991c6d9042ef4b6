//! Content generation: strategy dispatch with deterministic fallback.
//!
//! ```text
//! classify(brief, attachment names)
//!   ├─ DataPipeline → codegen::data_pipeline (no backend call)
//!   └─ General → backend.complete(prompt)
//!                  ├─ parsed files    → Backend
//!                  └─ no backend / error / unparsable → codegen::fallback
//! ```
//!
//! Generation never fails: every path yields a non-empty file set.

use std::fmt;
use std::sync::Arc;

use codegen::{
    classify, data_pipeline, fallback, parse_files_response, prompt, DecodedAttachment,
    GeneratedFileSet, GenerationStrategy,
};
use tracing::{info, warn};

use crate::backend::GenerativeBackend;

/// Which path actually produced a file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationSource {
    DataPipeline,
    Backend,
    Fallback,
}

impl fmt::Display for GenerationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataPipeline => write!(f, "data_pipeline"),
            Self::Backend => write!(f, "backend"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub files: GeneratedFileSet,
    pub source: GenerationSource,
    /// Why the fallback was used, when it was.
    pub fallback_reason: Option<String>,
}

pub struct ContentGenerator {
    backend: Option<Arc<dyn GenerativeBackend>>,
}

impl ContentGenerator {
    pub fn new(backend: Option<Arc<dyn GenerativeBackend>>) -> Self {
        Self { backend }
    }

    /// Generator with no backend: general tasks always get the fallback.
    pub fn offline() -> Self {
        Self { backend: None }
    }

    pub async fn generate(
        &self,
        brief: &str,
        checks: &[String],
        attachments: &[DecodedAttachment],
        round: u32,
    ) -> GeneratedFileSet {
        self.generate_with_source(brief, checks, attachments, round)
            .await
            .files
    }

    pub async fn generate_with_source(
        &self,
        brief: &str,
        checks: &[String],
        attachments: &[DecodedAttachment],
        round: u32,
    ) -> Generation {
        let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
        let strategy = classify(brief, &names);
        info!(%strategy, attachments = names.len(), "Selected generation strategy");

        let generation = match strategy {
            GenerationStrategy::DataPipeline => Generation {
                files: data_pipeline::generate(attachments),
                source: GenerationSource::DataPipeline,
                fallback_reason: None,
            },
            GenerationStrategy::General => {
                match self.generate_general(brief, checks, attachments, round).await {
                    Ok(files) => Generation {
                        files,
                        source: GenerationSource::Backend,
                        fallback_reason: None,
                    },
                    Err(reason) => {
                        warn!(%reason, "Using fallback files");
                        Generation {
                            files: fallback::generate(brief, checks),
                            source: GenerationSource::Fallback,
                            fallback_reason: Some(reason),
                        }
                    }
                }
            }
        };

        info!(
            source = %generation.source,
            files = ?generation.files.paths().collect::<Vec<_>>(),
            "Generated files"
        );
        generation
    }

    /// Ask the backend. `Err` carries the reason to fall back.
    async fn generate_general(
        &self,
        brief: &str,
        checks: &[String],
        attachments: &[DecodedAttachment],
        round: u32,
    ) -> Result<GeneratedFileSet, String> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| "no generative backend configured".to_string())?;

        let prompt = prompt::build_prompt(brief, checks, attachments, round);
        let response = backend
            .complete(&prompt)
            .await
            .map_err(|e| format!("backend call failed: {e}"))?;

        parse_files_response(&response).map_err(|e| format!("unusable backend response: {e}"))
    }
}
