//! Shared helpers for integration tests

#![allow(dead_code)]

use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use tlsmux::mux::tls::cert::generate;
use tlsmux::mux::{Application, InsecurePolicy, Outcome, Result, Server, ServerSettings, Settings};

/// Settings backed by a freshly generated certificate for "localhost"
pub fn self_signed(policy: InsecurePolicy) -> Settings {
    let identity = generate("localhost").unwrap();
    Settings::from_memory(identity.certificate_pem, identity.key_pem).with_insecure(policy)
}

/// Serve exactly one connection on a loopback port
pub fn serve_one<A: Application>(settings: Settings, app: A) -> (SocketAddr, JoinHandle<Result<Outcome>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let server = Server::from_listener(listener, settings, ServerSettings::default()).unwrap();
    let addr = server.local_addr().unwrap();

    let handle = thread::spawn(move || server.serve_one(&app));
    (addr, handle)
}

/// TLS client that accepts any server certificate
pub fn tls_connect(addr: SocketAddr) -> SslStream<TcpStream> {
    let mut builder = SslConnector::builder(SslMethod::tls_client()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();

    let tcp_stream = TcpStream::connect(addr).unwrap();
    connector
        .configure()
        .unwrap()
        .verify_hostname(false)
        .connect("localhost", tcp_stream)
        .unwrap()
}

/// Read until the server closes the TLS session
pub fn read_all_tls(stream: &mut SslStream<TcpStream>) -> Vec<u8> {
    let mut got = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => got.extend_from_slice(&buf[..n]),
            // Socket closed right after close_notify
            Err(_) => break,
        }
    }
    got
}

/// Deterministic file contents
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
