//! Domain error types. These classify failures for logging and for
//! choosing the right wire-level response; they are not used to abort
//! connections except at the credential boundary (see §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipSyncError {
    #[error("unknown pair id")]
    UnknownPair,
    #[error("token mismatch")]
    TokenMismatch,
    #[error("missing or invalid role")]
    InvalidRole,
    #[error("missing query parameter: {0}")]
    MissingParam(&'static str),

    #[error("invalid file meta")]
    InvalidFileMeta,
    #[error("unknown file id")]
    UnknownFile,

    #[error("too many simultaneous file transfers. maximum is {0}")]
    TooManyFiles(usize),
    #[error("file too large. maximum size is {0}mb")]
    FileTooLarge(u64),
}

impl ClipSyncError {
    /// The message sent in an `{type: "error", message}` frame, matching
    /// the exact wording spec §8 scenario 5/6 expect on the wire.
    pub fn wire_message(&self) -> String {
        match self {
            ClipSyncError::InvalidFileMeta => "Invalid file meta".to_string(),
            ClipSyncError::TooManyFiles(max) => {
                format!("Too many simultaneous file transfers. Maximum is {max}")
            }
            ClipSyncError::FileTooLarge(max_mb) => {
                format!("File too large. Maximum size is {max_mb}MB")
            }
            other => other.to_string(),
        }
    }
}
