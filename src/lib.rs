//! mTLS Blob Upload
//!
//! Uploads a single file to an HTTPS ingestion endpoint, authenticating
//! with a client certificate instead of a token or password.
//!
//! ## Features
//! - Content-type detection from the file's leading bytes
//! - Trust pool built from a PEM bundle of intermediates and roots
//! - Client identity with certificate/key consistency checking
//! - One mutually authenticated POST per run, no retries
//!
//! ## Usage
//!
//! ```bash
//! # Upload with the default certificate files in the current directory
//! blob-upload reading.json
//!
//! # Explicit certificates and endpoint
//! blob-upload --cert device.crt --key device.key --chain chain.crt \
//!     --endpoint https://ingest.example.com/blobs reading.json
//! ```

pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod tls;

pub use client::{SecureUploadClient, UploadOutcome, UploadState};
pub use config::UploadConfig;
pub use content::{detect_content_type, Payload};
pub use error::{ErrorKind, UploadError};
pub use tls::{ClientIdentity, ClientTlsConfig, TrustPool};
