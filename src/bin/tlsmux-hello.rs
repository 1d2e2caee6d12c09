//! Minimal HTTP responder on a TLS/plaintext multiplexed port
//!
//! Answers every request with a short greeting, or with the contents of
//! `--file`, over whichever transport the client picked.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tlsmux::mux::tls::cert;
use tlsmux::mux::{
    run, Connection, FileSpan, Received, ServerSettings, Settings, Source, TlsVersion, Verbosity,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Largest request head accepted before answering
const MAX_HEAD: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "tlsmux-hello")]
#[command(about = "Serve HTTP and HTTPS on one port", long_about = None)]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// PEM certificate file
    #[arg(long, default_value = "certificate.pem")]
    cert: PathBuf,

    /// PEM private key file
    #[arg(long, default_value = "key.pem")]
    key: PathBuf,

    /// Intermediate certificate files, in order
    #[arg(long)]
    chain: Vec<PathBuf>,

    /// Generate a throwaway certificate for this name instead of loading files
    #[arg(long, value_name = "NAME")]
    self_signed: Option<String>,

    /// Serve plaintext clients instead of denying them
    #[arg(long)]
    allow_insecure: bool,

    /// Enabled TLS versions
    #[arg(long, value_delimiter = ',', default_value = "TLSv1.3,TLSv1.2,TLSv1.1")]
    versions: Vec<TlsVersion>,

    /// TLS log detail: quiet, handshake or records
    #[arg(long, default_value = "quiet")]
    verbosity: Verbosity,

    /// Serve this file as the response body
    #[arg(long)]
    file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tlsmux=debug,tlsmux_hello=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut builder = Settings::builder()
        .versions(&cli.versions)
        .verbosity(cli.verbosity);

    builder = match &cli.self_signed {
        Some(name) => {
            let identity = cert::generate(name)?;
            tracing::info!("using self-signed certificate for {}", name);
            builder
                .certificate(Source::memory(identity.certificate_pem))
                .key(Source::memory(identity.key_pem))
        }
        None => {
            let mut builder = builder
                .certificate(Source::file(&cli.cert))
                .key(Source::file(&cli.key));
            for path in &cli.chain {
                builder = builder.chain(Source::file(path));
            }
            builder
        }
    };

    if cli.allow_insecure {
        builder = builder.allow_insecure();
    }

    let settings = builder.build()?;
    let server = ServerSettings::default().host(cli.host).port(cli.port);
    let file = cli.file;

    run(settings, server, move |conn: &mut dyn Connection, peer: SocketAddr| {
        respond(conn, peer, file.as_ref())
    })?;

    Ok(())
}

fn respond(
    conn: &mut dyn Connection,
    peer: SocketAddr,
    file: Option<&PathBuf>,
) -> tlsmux::mux::Result<()> {
    let mut head = Vec::new();
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match conn.receive()? {
            Received::Data(chunk) => head.extend_from_slice(&chunk),
            Received::EndOfStream => return Ok(()),
        }
        if head.len() > MAX_HEAD {
            return conn.send_all(b"HTTP/1.1 431 Request Header Fields Too Large\r\n\r\n");
        }
    }

    let request_line = head.split(|b| *b == b'\n').next().unwrap_or_default();
    tracing::info!(
        "{} {} {}",
        peer,
        if conn.is_secure() { "https" } else { "http" },
        String::from_utf8_lossy(request_line).trim_end()
    );

    match file {
        Some(path) => {
            let length = std::fs::metadata(path)?.len();
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                length
            );
            conn.send_file(FileSpan::new(path, 0, length).header(header))
        }
        None => {
            let body = if conn.is_secure() {
                "Hello over TLS\n"
            } else {
                "Hello in plaintext\n"
            };
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            conn.send_many(&[header.as_bytes(), body.as_bytes()])
        }
    }
}
