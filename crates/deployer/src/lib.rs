//! Task deployment service.
//!
//! Turns a task request into a published static site: decode attachments,
//! generate files (deterministically or through a generative backend), commit
//! them to a hosted repository, enable static hosting and report the result
//! to an evaluation endpoint.

pub mod backend;
pub mod config;
pub mod error;
pub mod generator;
pub mod host;
pub mod memory;
pub mod notifier;
pub mod orchestrator;
pub mod reconciler;
pub mod request;
pub mod server;
pub mod stages;
pub mod telemetry;

pub use config::DeployerConfig;
pub use error::{HostError, PipelineError};
pub use orchestrator::{RunReport, TaskOrchestrator};
pub use request::{NotificationPayload, TaskRequest};
pub use stages::TaskState;
