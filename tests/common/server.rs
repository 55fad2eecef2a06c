//! Minimal HTTPS responder requiring client certificates.
//!
//! Accepts a single connection and records the request it receives if the
//! handshake succeeds. It then either answers with a fixed status line or
//! closes the connection without a response.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use super::pki::{Issued, TestPki};

/// What the server saw on the wire after a successful handshake
#[derive(Debug)]
pub struct ReceivedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim().to_ascii_lowercase() == name).then(|| value.trim().to_string())
        })
    }

    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    received: oneshot::Receiver<Option<ReceivedRequest>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("https://{}{}", self.addr, path)
    }

    /// The recorded request, or `None` if the handshake never completed
    pub async fn received(self) -> Option<ReceivedRequest> {
        tokio::time::timeout(Duration::from_secs(5), self.received)
            .await
            .expect("server did not finish in time")
            .expect("server task dropped")
    }
}

/// Server config presenting `server` (plus its intermediate) and requiring
/// client certificates issued under `client_ca`
pub fn mtls_server_config(
    server_pki: &TestPki,
    server: &Issued,
    client_ca: &TestPki,
) -> ServerConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    roots
        .add(client_ca.root.der().clone())
        .expect("Failed to add client CA root");

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .expect("Failed to build client verifier");

    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("Protocol versions")
        .with_client_cert_verifier(verifier)
        .with_single_cert(server.der_chain(server_pki), server.private_key_der())
        .expect("Failed to build server TLS config")
}

pub async fn spawn_server(config: ServerConfig, status_line: &'static str) -> TestServer {
    start(config, Some(status_line)).await
}

/// Server that reads the whole request and then hangs up without answering
pub async fn spawn_silent_server(config: ServerConfig) -> TestServer {
    start(config, None).await
}

async fn start(config: ServerConfig, status_line: Option<&'static str>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let connections = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();

    let counter = connections.clone();
    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else {
            let _ = tx.send(None);
            return;
        };
        counter.fetch_add(1, Ordering::SeqCst);

        let mut tls = match acceptor.accept(tcp).await {
            Ok(tls) => tls,
            Err(_) => {
                let _ = tx.send(None);
                return;
            }
        };

        let request = match read_request(&mut tls).await {
            Ok(request) => request,
            Err(_) => {
                let _ = tx.send(None);
                return;
            }
        };

        if let Some(status_line) = status_line {
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_line
            );
            let _ = tls.write_all(response.as_bytes()).await;
        }
        let _ = tls.shutdown().await;
        let _ = tx.send(Some(request));
    });

    TestServer {
        addr,
        connections,
        received: rx,
    }
}

async fn read_request<S>(stream: &mut S) -> std::io::Result<ReceivedRequest>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut request = ReceivedRequest {
        head,
        body: Vec::new(),
    };
    let content_length: usize = request
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buf.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    request.body = buf[body_start..body_start + content_length].to_vec();
    Ok(request)
}
