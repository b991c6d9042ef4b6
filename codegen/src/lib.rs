//! Deterministic file generation for task deployments.
//!
//! This library provides the network-free half of the deployer:
//! - Attachment decoding from embedded `data:` URLs into scratch files
//! - The generated file set model (text or binary content per path)
//! - Strategy classification over a brief and its attachment names
//! - The data-pipeline strategy (source fix-ups, spreadsheet → CSV, CI workflow)
//! - Prompt construction and defensive parsing of backend responses
//! - Deterministic fallback templates used when the backend cannot help
//!
//! Nothing in here performs network I/O. The `deployer` crate wires these
//! pieces to the generative backend and the repository host.

pub mod attachments;
pub mod data_pipeline;
pub mod fallback;
pub mod files;
pub mod prompt;
pub mod response;
pub mod spreadsheet;
pub mod strategy;

pub use attachments::{
    decode_attachment, decode_attachments, AttachmentRef, DecodeError, DecodedAttachment,
};
pub use files::{FileContent, GeneratedFileSet};
pub use response::{parse_files_response, ParseError};
pub use spreadsheet::ConvertError;
pub use strategy::{classify, GenerationStrategy};
