//! Secure Upload Client Module
//!
//! This module performs the single mutually authenticated HTTPS POST that
//! carries a payload to the ingestion endpoint.
//!
//! ## Upload Lifecycle
//!
//! ```text
//! Idle ──> BuildingTlsConfig ──> Connecting ──> Sending ──> AwaitingResponse ──> Done
//!               │                    │             │               │
//!               └────────────────────┴─────────────┴───────────────┴──────────> Failed
//! ```
//!
//! `Done` and `Failed` are terminal. There is no retry transition: a client
//! that has reached either refuses to start another upload.
//!
//! ## What counts as success
//!
//! Any HTTP response is a completed upload. The status code is reported
//! to the caller as-is; deciding whether e.g. a 403 is an application
//! failure is the caller's business.
//!
//! ## Request shape
//!
//! The body is the raw payload and `Content-Type` is the sniffed type.
//! Apart from `Content-Length` and `Host`, the only other header on the
//! wire is reqwest's built-in `Accept: */*`, which the client cannot
//! suppress. No query string is added to the destination URL.
//!
//! ## Timeouts
//!
//! No timeout is imposed here beyond the transport defaults. Callers that
//! need bounded latency wrap the `upload` future in their own deadline
//! (the CLI does so with `tokio::time::timeout`).

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;

use futures::stream::{self, Stream};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use tracing::{debug, info};

use crate::content::Payload;
use crate::error::{Result, UploadError};
use crate::tls::{ClientIdentity, ClientTlsConfig, TrustPool};

/// Where an upload currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    BuildingTlsConfig,
    Connecting,
    Sending,
    AwaitingResponse,
    Done,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Done | UploadState::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Idle => "idle",
            UploadState::BuildingTlsConfig => "building TLS config",
            UploadState::Connecting => "connecting",
            UploadState::Sending => "sending",
            UploadState::AwaitingResponse => "awaiting response",
            UploadState::Done => "done",
            UploadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The server's answer to a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Numeric HTTP status code
    pub status: u16,
    /// Reason phrase, when the status code has a standard one
    pub reason: Option<String>,
}

impl UploadOutcome {
    fn from_status(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            reason: status.canonical_reason().map(String::from),
        }
    }

    /// Status as it appears in an HTTP status line, e.g. `"200 OK"`
    pub fn status_line(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} {}", self.status, reason),
            None => self.status.to_string(),
        }
    }

    /// True for 2xx. Informational only; the outcome is reported either way.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_line())
    }
}

/// One-shot mutual-TLS upload client
pub struct SecureUploadClient {
    state: UploadState,
}

impl Default for SecureUploadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureUploadClient {
    /// Create a new client in the `Idle` state
    pub fn new() -> Self {
        Self {
            state: UploadState::Idle,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// POST `payload` to `url`, authenticating with `identity` and trusting
    /// only the authorities in `trust`.
    ///
    /// Exactly one request is attempted. Every failure is reported as
    /// [`UploadError::Transport`] carrying the state it happened in, except
    /// for a client certificate the TLS layer refuses, which is
    /// [`UploadError::IdentityLoad`].
    pub async fn upload(
        &mut self,
        payload: Payload,
        trust: TrustPool,
        identity: ClientIdentity,
        url: &str,
    ) -> Result<UploadOutcome> {
        if self.state != UploadState::Idle {
            return Err(UploadError::AlreadyAttempted);
        }

        match self.run(payload, trust, identity, url).await {
            Ok(outcome) => {
                self.transition(UploadState::Done);
                Ok(outcome)
            }
            Err(e) => {
                self.transition(UploadState::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        payload: Payload,
        trust: TrustPool,
        identity: ClientIdentity,
        url: &str,
    ) -> Result<UploadOutcome> {
        self.transition(UploadState::BuildingTlsConfig);
        let tls = ClientTlsConfig::new(trust, identity)?;

        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls.config)
            .redirect(Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| UploadError::transport(UploadState::BuildingTlsConfig, &e))?;

        self.transition(UploadState::Connecting);
        let url = Url::parse(url).map_err(|e| UploadError::transport(UploadState::Connecting, &e))?;

        info!(
            "📤 Uploading {} bytes ({}) to {}",
            payload.len(),
            payload.content_type(),
            url
        );

        let delivered = Arc::new(AtomicBool::new(payload.is_empty()));
        let request = http
            .post(url)
            .header(CONTENT_TYPE, payload.content_type())
            .header(CONTENT_LENGTH, payload.len())
            .body(tracked_body(payload.into_bytes(), delivered.clone()));

        let response = request.send().await.map_err(|e| {
            let stage = failed_stage(&e, delivered.load(Ordering::SeqCst));
            debug!("Request failed while {}: {:?}", stage, e);
            UploadError::transport(stage, &e)
        })?;

        // Connect, send and the wait for the head all happen inside `send`;
        // reaching here means each of them completed.
        self.transition(UploadState::Sending);
        self.transition(UploadState::AwaitingResponse);

        let outcome = UploadOutcome::from_status(response.status());
        info!("Status from server is {}", outcome);
        Ok(outcome)
    }

    fn transition(&mut self, next: UploadState) {
        debug!("Upload state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Request body that raises `delivered` once the transport has taken the
/// last byte of the payload.
///
/// An empty payload produces no body frames, so callers start the flag as
/// set for it.
fn tracked_body(bytes: Vec<u8>, delivered: Arc<AtomicBool>) -> reqwest::Body {
    reqwest::Body::wrap_stream(tracked_chunks(bytes, delivered))
}

fn tracked_chunks(
    bytes: Vec<u8>,
    delivered: Arc<AtomicBool>,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    let mut pending = Some(bytes);
    stream::poll_fn(move |_| {
        let chunk = pending.take();
        delivered.store(true, Ordering::SeqCst);
        Poll::Ready(chunk.map(Ok))
    })
}

/// Map a reqwest failure onto the lifecycle stage it interrupted
fn failed_stage(err: &reqwest::Error, body_delivered: bool) -> UploadState {
    if err.is_connect() || err.is_builder() {
        UploadState::Connecting
    } else if body_delivered {
        UploadState::AwaitingResponse
    } else {
        UploadState::Sending
    }
}
