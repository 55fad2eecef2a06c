//! TLS Trust and Identity Module
//!
//! This module assembles everything the TLS layer needs for a mutually
//! authenticated connection:
//! - A trust pool of intermediate and root certificates used to verify
//!   the server
//! - The client identity (certificate chain + private key) presented to
//!   the server during the handshake
//! - The rustls client configuration combining the two
//!
//! ## Mutual TLS
//!
//! ```text
//! Client                                     Server
//!   |-- ClientHello (SNI) ------------------->  |
//!   |<------------- ServerHello, Certificate -  |  verified against TrustPool
//!   |<------------------- CertificateRequest -  |
//!   |-- Certificate, CertificateVerify ------>  |  signed with ClientIdentity key
//!   |-- Finished ---------------------------->  |
//!   |<-------------------------------- Finished |
//! ```
//!
//! The pool is a set, not an ordered chain. rustls (webpki) builds and
//! validates the path at handshake time, including the hostname check.
//! Verification cannot be switched off.

use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::{certs, private_key};
use tracing::{debug, info, warn};

use crate::client::UploadState;
use crate::error::{Result, UploadError};

/// The crypto provider used for every TLS operation in this crate
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Trusted certificate authorities used to verify the server
pub struct TrustPool {
    roots: RootCertStore,
}

impl TrustPool {
    /// Build a pool from a PEM bundle holding one or more certificates.
    ///
    /// Blocks that fail to decode, or decode to something that is not a
    /// certificate, are skipped. The load only fails if nothing usable
    /// is left.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut candidates: Vec<CertificateDer<'static>> = Vec::new();

        // Parse block by block so an unterminated or mislabelled block
        // cannot consume the certificates that follow it.
        for segment in pem_segments(pem) {
            let mut reader = BufReader::new(segment);
            for item in certs(&mut reader) {
                match item {
                    Ok(cert) => candidates.push(cert),
                    Err(e) => {
                        warn!("Skipping malformed PEM block in trust bundle: {}", e);
                        break;
                    }
                }
            }
        }

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(candidates);
        if ignored > 0 {
            warn!("Ignored {} unparseable certificate(s) in trust bundle", ignored);
        }

        if added == 0 {
            return Err(UploadError::TrustLoad(
                "No valid certificates found in PEM data".to_string(),
            ));
        }

        debug!("Trust pool holds {} certificate(s)", added);
        Ok(Self { roots })
    }

    /// Build a pool from a PEM bundle on disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path).map_err(|e| {
            UploadError::TrustLoad(format!("Failed to read trust bundle {:?}: {}", path, e))
        })?;

        let pool = Self::from_pem(&pem).map_err(|_| {
            UploadError::TrustLoad(format!("No valid certificates found in {:?}", path))
        })?;
        info!("Loaded {} trusted certificate(s) from {:?}", pool.len(), path);
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl fmt::Debug for TrustPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustPool")
            .field("certificates", &self.roots.len())
            .finish()
    }
}

/// Split PEM data at every line starting with `-----BEGIN `.
///
/// Text before the first marker is dropped; each segment holds at most one
/// block plus whatever trails it.
fn pem_segments(pem: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in pem.split_inclusive(|b| *b == b'\n') {
        if line.trim_ascii_start().starts_with(b"-----BEGIN ") {
            starts.push(offset);
        }
        offset += line.len();
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(pem.len());
            &pem[start..end]
        })
        .collect()
}

/// The certificate and private key this device authenticates with.
///
/// Only obtainable through the loaders below, which verify that the key
/// belongs to the leaf certificate. The key itself is never exposed.
pub struct ClientIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientIdentity {
    /// Load an identity from PEM data
    ///
    /// # Arguments
    /// * `cert_pem` - The leaf certificate, optionally followed by intermediates
    /// * `key_pem` - The matching private key (PKCS#8, PKCS#1 or SEC1)
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let mut reader = BufReader::new(cert_pem);
        let cert_chain: Vec<CertificateDer<'static>> = certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                UploadError::IdentityLoad(format!("Failed to parse client certificate: {}", e))
            })?;

        if cert_chain.is_empty() {
            return Err(UploadError::IdentityLoad(
                "No certificate found in client certificate PEM".to_string(),
            ));
        }

        let mut reader = BufReader::new(key_pem);
        let key = private_key(&mut reader)
            .map_err(|e| UploadError::IdentityLoad(format!("Failed to read private key: {}", e)))?
            .ok_or_else(|| {
                UploadError::IdentityLoad("No private key found in PEM data".to_string())
            })?;

        verify_key_pair(&cert_chain, &key)?;

        debug!(
            "Client identity loaded ({} certificate(s) in chain)",
            cert_chain.len()
        );
        Ok(Self { cert_chain, key })
    }

    /// Load an identity from a certificate file and a private key file
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            UploadError::IdentityLoad(format!(
                "Failed to read client certificate {:?}: {}",
                cert_path, e
            ))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            UploadError::IdentityLoad(format!("Failed to read private key {:?}: {}", key_path, e))
        })?;

        let identity = Self::from_pem(&cert_pem, &key_pem)?;
        info!(
            "Loaded client certificate from {:?} and private key from {:?}",
            cert_path, key_path
        );
        Ok(identity)
    }

    /// Number of certificates presented to the server (leaf included)
    pub fn chain_len(&self) -> usize {
        self.cert_chain.len()
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("chain_len", &self.cert_chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Check that `key` is the private half of the leaf certificate's public key.
///
/// Goes through the provider's own key loader, so unsupported key types
/// are rejected here rather than during the handshake.
fn verify_key_pair(
    cert_chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<()> {
    let provider = crypto_provider();
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| UploadError::IdentityLoad(format!("Unusable private key: {}", e)))?;

    CertifiedKey::new(cert_chain.to_vec(), signing_key)
        .keys_match()
        .map_err(|e| {
            UploadError::IdentityLoad(format!(
                "Private key does not match client certificate: {}",
                e
            ))
        })
}

/// TLS configuration for one mutually authenticated upload
pub struct ClientTlsConfig {
    pub config: ClientConfig,
}

impl ClientTlsConfig {
    /// Combine a trust pool and a client identity into a client config.
    ///
    /// # Security Notes
    /// - The server certificate is always verified against `trust`,
    ///   including the hostname
    /// - TLS 1.2 and 1.3 with the provider's safe defaults only
    pub fn new(trust: TrustPool, identity: ClientIdentity) -> Result<Self> {
        let config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| UploadError::transport(UploadState::BuildingTlsConfig, &e))?
            .with_root_certificates(trust.roots)
            .with_client_auth_cert(identity.cert_chain, identity.key)
            .map_err(|e| {
                UploadError::IdentityLoad(format!(
                    "Client certificate rejected by TLS layer: {}",
                    e
                ))
            })?;

        Ok(Self { config })
    }
}
