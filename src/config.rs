//! Upload configuration and the end-to-end pipeline
//!
//! Paths and the endpoint are plain values handed in by the caller, so
//! the core carries no process-wide state and can be driven from tests
//! with temporary files.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::client::{SecureUploadClient, UploadOutcome};
use crate::content::Payload;
use crate::error::Result;
use crate::tls::{ClientIdentity, TrustPool};

/// Client certificate used when none is configured
pub const DEFAULT_CLIENT_CERT: &str = "clientcert.crt";
/// Intermediate + root bundle used when none is configured
pub const DEFAULT_CHAIN: &str = "span-cert-chain.crt";
/// Private key used when none is configured
pub const DEFAULT_KEY: &str = "private.key";
/// Ingestion endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "https://data.lab5e.com/some/random/path";

/// Everything needed to perform one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// PEM client certificate (leaf, optionally followed by intermediates)
    pub client_cert_path: PathBuf,
    /// PEM bundle of intermediate and root certificates trusted for the server
    pub chain_path: PathBuf,
    /// PEM private key matching the client certificate
    pub key_path: PathBuf,
    /// Full URL the file is POSTed to
    pub endpoint_url: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            client_cert_path: PathBuf::from(DEFAULT_CLIENT_CERT),
            chain_path: PathBuf::from(DEFAULT_CHAIN),
            key_path: PathBuf::from(DEFAULT_KEY),
            endpoint_url: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl UploadConfig {
    /// Upload `file` to the configured endpoint.
    ///
    /// Steps run strictly in order and the first failure ends the run:
    /// read file, load trust pool, load client identity, then POST.
    /// Nothing touches the network unless all loads succeed.
    pub async fn upload_file(&self, file: &Path) -> Result<UploadOutcome> {
        let payload = Payload::read(file).await?;
        info!("Detected content-type: {}", payload.content_type());

        let trust = TrustPool::from_file(&self.chain_path)?;
        let identity = ClientIdentity::from_files(&self.client_cert_path, &self.key_path)?;

        let mut client = SecureUploadClient::new();
        client
            .upload(payload, trust, identity, &self.endpoint_url)
            .await
    }
}
