//! Attachment decoding.
//!
//! Inbound attachments carry their bytes inline as `data:<mime>;base64,<payload>`
//! URLs. Decoding turns each one into a [`DecodedAttachment`] and persists the
//! bytes under a shared scratch directory so later stages can address them by
//! path. Entries with any other URL form are skipped silently; entries that fail
//! to decode are logged and skipped without affecting the rest of the batch.

use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const DATA_URL_SCHEME: &str = "data:";

/// An attachment as it arrives on the inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Relative file path the attachment should be published under.
    pub name: String,
    /// Embedded data URL, or anything else (which is ignored).
    #[serde(default)]
    pub url: String,
}

impl AttachmentRef {
    pub fn is_data_url(&self) -> bool {
        self.url.starts_with(DATA_URL_SCHEME)
    }
}

/// A decoded attachment, owned by a single task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAttachment {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    /// Scratch copy of `bytes`. Not isolated between concurrent runs.
    pub local_path: PathBuf,
}

impl DecodedAttachment {
    /// Lowercased extension of the attachment name, without the dot.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }

    /// Whether a short textual preview of this attachment is meaningful.
    pub fn is_text_like(&self) -> bool {
        const TEXT_EXTENSIONS: [&str; 5] = ["txt", "csv", "json", "md", "py"];
        self.mime.starts_with("text")
            || self
                .extension()
                .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
    }

    /// The bytes as UTF-8, if they are valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// Why a single attachment could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a data URL")]
    NotDataUrl,

    #[error("data URL has no ',' separating header from payload")]
    MissingPayload,

    #[error("unsafe attachment name: {0}")]
    UnsafeName(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to write scratch file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decode every data-URL attachment in `refs`, preserving input order.
///
/// Non-data URLs are dropped without a log line. Individual failures are
/// logged at `warn` and skipped.
pub fn decode_attachments(refs: &[AttachmentRef], scratch_dir: &Path) -> Vec<DecodedAttachment> {
    let mut decoded = Vec::with_capacity(refs.len());

    for attachment in refs.iter().filter(|a| a.is_data_url()) {
        match decode_attachment(attachment, scratch_dir) {
            Ok(att) => {
                info!(
                    name = %att.name,
                    mime = %att.mime,
                    bytes = att.bytes.len(),
                    "Decoded attachment"
                );
                decoded.push(att);
            }
            Err(e) => {
                warn!(name = %attachment.name, error = %e, "Failed to decode attachment");
            }
        }
    }

    decoded
}

/// Decode a single attachment and persist its bytes under `scratch_dir`.
pub fn decode_attachment(
    attachment: &AttachmentRef,
    scratch_dir: &Path,
) -> Result<DecodedAttachment, DecodeError> {
    let rest = attachment
        .url
        .strip_prefix(DATA_URL_SCHEME)
        .ok_or(DecodeError::NotDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(DecodeError::MissingPayload)?;
    let mime = header.split(';').next().unwrap_or_default().to_string();

    let relative = safe_relative_path(&attachment.name)?;
    // MIME-style payloads arrive wrapped at 76 columns.
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64_STANDARD.decode(payload)?;

    let local_path = scratch_dir.join(relative);
    write_scratch(&local_path, &bytes)?;

    Ok(DecodedAttachment {
        name: attachment.name.clone(),
        mime,
        bytes,
        local_path,
    })
}

/// Reject names that would escape the scratch directory.
fn safe_relative_path(name: &str) -> Result<PathBuf, DecodeError> {
    let path = Path::new(name);
    let escapes = name.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(DecodeError::UnsafeName(name.to_string()));
    }
    Ok(path.to_path_buf())
}

fn write_scratch(path: &Path, bytes: &[u8]) -> Result<(), DecodeError> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    };
    write().map_err(|source| DecodeError::Write {
        path: path.to_path_buf(),
        source,
    })
}
