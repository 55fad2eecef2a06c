//! mTLS Blob Upload CLI - Main Entry Point
//!
//! Uploads one file to the ingestion endpoint and reports the server's
//! status.
//!
//! # Pipeline
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌────────────┐   ┌───────────────┐   ┌────────────┐
//! │ read file │──>│ classify │──>│ trust pool │──>│ client ident. │──>│ mTLS POST  │
//! └───────────┘   └──────────┘   └────────────┘   └───────────────┘   └────────────┘
//!   FileRead                       TrustLoad        IdentityLoad        Transport
//! ```
//!
//! Each stage fails fast; the process exits non-zero on any failure.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mtls_blob_upload::config::{DEFAULT_CHAIN, DEFAULT_CLIENT_CERT, DEFAULT_ENDPOINT, DEFAULT_KEY};
use mtls_blob_upload::UploadConfig;

/// Upload a blob to an HTTPS endpoint using a client certificate
#[derive(Parser)]
#[command(name = "blob-upload")]
#[command(version)]
#[command(about = "Upload a file using mutual TLS authentication", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the client certificate (PEM)
    #[arg(long, default_value = DEFAULT_CLIENT_CERT)]
    cert: PathBuf,

    /// Path to the intermediate + root certificate bundle (PEM)
    #[arg(long, default_value = DEFAULT_CHAIN)]
    chain: PathBuf,

    /// Path to the client private key (PEM)
    #[arg(long, default_value = DEFAULT_KEY)]
    key: PathBuf,

    /// URL the file is POSTed to
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Give up after this many seconds (no limit by default)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// File to upload
    file: Option<PathBuf>,
}

fn usage(program: &str) -> String {
    format!("Usage {} [file to upload]", program)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(file) = cli.file else {
        let program = std::env::args()
            .next()
            .unwrap_or_else(|| "blob-upload".to_string());
        println!("{}", usage(&program));
        return Ok(());
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = UploadConfig {
        client_cert_path: cli.cert,
        chain_path: cli.chain,
        key_path: cli.key,
        endpoint_url: cli.endpoint,
    };

    let upload = config.upload_file(&file);
    let outcome = match cli.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), upload)
            .await
            .with_context(|| format!("Upload did not complete within {}s", secs))?,
        None => upload.await,
    }
    .with_context(|| format!("Failed to upload {:?}", file))?;

    if outcome.is_success() {
        info!("✅ Upload complete: {}", outcome);
    } else {
        warn!("Server answered {}", outcome);
    }

    Ok(())
}
