//! Task pipeline state machine and stage runner.
//!
//! A run moves strictly forward through the states below. Each stage hands
//! its result to [`StageRunner::apply`] as a [`StageOutcome`], and the runner
//! applies one policy everywhere: soft failures are logged and the run moves
//! on, a fatal outcome moves the run to `Failed` and stops it.
//!
//! ```text
//! Received → AttachmentsDecoded → RepositoryReady → Generated → FilesCommitted
//!   → AttachmentsCommitted → LicenseCommitted → HostingEnabled → CommitResolved
//!   → Notified → Done
//! any non-terminal state → Failed
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{HostError, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Received,
    AttachmentsDecoded,
    RepositoryReady,
    Generated,
    FilesCommitted,
    AttachmentsCommitted,
    LicenseCommitted,
    HostingEnabled,
    CommitResolved,
    Notified,
    /// Terminal: the run went through every stage.
    Done,
    /// Terminal: a fatal stage ended the run early.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The only state allowed after `self` on the success path.
    pub fn next(self) -> Option<TaskState> {
        use TaskState::*;
        match self {
            Received => Some(AttachmentsDecoded),
            AttachmentsDecoded => Some(RepositoryReady),
            RepositoryReady => Some(Generated),
            Generated => Some(FilesCommitted),
            FilesCommitted => Some(AttachmentsCommitted),
            AttachmentsCommitted => Some(LicenseCommitted),
            LicenseCommitted => Some(HostingEnabled),
            HostingEnabled => Some(CommitResolved),
            CommitResolved => Some(Notified),
            Notified => Some(Done),
            Done | Failed => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "Received",
            Self::AttachmentsDecoded => "AttachmentsDecoded",
            Self::RepositoryReady => "RepositoryReady",
            Self::Generated => "Generated",
            Self::FilesCommitted => "FilesCommitted",
            Self::AttachmentsCommitted => "AttachmentsCommitted",
            Self::LicenseCommitted => "LicenseCommitted",
            Self::HostingEnabled => "HostingEnabled",
            Self::CommitResolved => "CommitResolved",
            Self::Notified => "Notified",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

fn is_legal_transition(from: TaskState, to: TaskState) -> bool {
    if to == TaskState::Failed {
        return !from.is_terminal();
    }
    from.next() == Some(to)
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: TaskState,
    pub to: TaskState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// What a stage produced.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Succeeded(T),
    /// Partial success; the run continues with `T`.
    SoftFailure(T, String),
    Fatal(HostError),
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    /// Milliseconds since the run was received.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Drives one run through [`TaskState`], enforcing order and recording
/// every transition.
pub struct StageRunner {
    current: TaskState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
    soft_failures: Vec<String>,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRunner {
    pub fn new() -> Self {
        Self {
            current: TaskState::Received,
            created_at: Instant::now(),
            transitions: Vec::new(),
            soft_failures: Vec::new(),
        }
    }

    pub fn current(&self) -> TaskState {
        self.current
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn soft_failures(&self) -> &[String] {
        &self.soft_failures
    }

    /// Record the outcome of the stage that ends in `stage`.
    pub fn apply<T>(
        &mut self,
        stage: TaskState,
        outcome: StageOutcome<T>,
    ) -> Result<T, PipelineError> {
        match outcome {
            StageOutcome::Succeeded(value) => {
                self.advance(stage, None)?;
                info!(%stage, "Stage complete");
                Ok(value)
            }
            StageOutcome::SoftFailure(value, reason) => {
                warn!(%stage, %reason, "Stage completed with failures");
                self.advance(stage, Some(reason.clone()))?;
                self.soft_failures.push(format!("{stage}: {reason}"));
                Ok(value)
            }
            StageOutcome::Fatal(source) => {
                error!(%stage, error = %source, "Stage failed, abandoning run");
                self.advance(TaskState::Failed, Some(source.to_string()))?;
                Err(PipelineError::Fatal { stage, source })
            }
        }
    }

    /// Move to the terminal `Done` state.
    pub fn finish(&mut self) -> Result<(), IllegalTransition> {
        self.advance(TaskState::Done, None)
    }

    fn advance(&mut self, to: TaskState, reason: Option<String>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason,
        });
        self.current = to;
        Ok(())
    }
}
