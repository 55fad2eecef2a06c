//! Error taxonomy for the upload pipeline
//!
//! Every stage of the pipeline has its own variant so callers (and tests)
//! can tell exactly where a run stopped. None of these are retried.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::client::UploadState;

/// Upload pipeline errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read file {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load trust chain: {0}")]
    TrustLoad(String),

    #[error("Failed to load client identity: {0}")]
    IdentityLoad(String),

    #[error("Transport error while {stage}: {message}")]
    Transport { stage: UploadState, message: String },

    #[error("Upload already attempted; a client performs exactly one request")]
    AlreadyAttempted,
}

/// Discriminant of [`UploadError`], handy for matching without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FileRead,
    TrustLoad,
    IdentityLoad,
    Transport,
    AlreadyAttempted,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::FileRead { .. } => ErrorKind::FileRead,
            UploadError::TrustLoad(_) => ErrorKind::TrustLoad,
            UploadError::IdentityLoad(_) => ErrorKind::IdentityLoad,
            UploadError::Transport { .. } => ErrorKind::Transport,
            UploadError::AlreadyAttempted => ErrorKind::AlreadyAttempted,
        }
    }

    /// Build a transport error from any error, flattening its source chain
    /// so the root cause (e.g. the rustls alert) is visible in one line.
    pub(crate) fn transport(stage: UploadState, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        UploadError::Transport { stage, message }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, UploadError>;
