//! Listener and per-connection dispatch
//!
//! One thread per accepted connection. Each thread sniffs its socket, builds
//! the matching connection (or denies plaintext), hands it to the application
//! and closes it afterwards.

use super::connection::Connection;
use super::plain::{deny, PlainConnection};
use super::sniff::{sniff, Transport};
use super::socket::Socket;
use super::tls::{InsecurePolicy, SecureConnection, SecureContext, Settings};
use super::{Error, Result};
use socket2::{Domain, Protocol, Type};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address to bind
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// Listen backlog
    pub backlog: i32,

    /// Set `SO_REUSEADDR` before binding
    pub reuse_address: bool,

    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".to_string(),
            port: 3000,
            backlog: 1024,
            reuse_address: true,
            nodelay: true,
        }
    }
}

impl ServerSettings {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn reuse_address(mut self, enable: bool) -> Self {
        self.reuse_address = enable;
        self
    }

    pub fn nodelay(mut self, enable: bool) -> Self {
        self.nodelay = enable;
        self
    }

    /// `host:port` as configured
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-connection application callback
///
/// Called once per connection that was not rejected. The connection is closed
/// after the callback returns, whatever its result, and also when it panics.
pub trait Application: Send + Sync + 'static {
    fn handle(&self, conn: &mut dyn Connection, peer: SocketAddr) -> Result<()>;
}

impl<F> Application for F
where
    F: Fn(&mut dyn Connection, SocketAddr) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, conn: &mut dyn Connection, peer: SocketAddr) -> Result<()> {
        self(conn, peer)
    }
}

/// Connection produced by negotiation
pub enum Negotiated<S: Socket> {
    /// TLS handshake completed
    Secure(SecureConnection<S>),
    /// Plaintext allowed by policy
    Plain(PlainConnection<S>),
    /// Plaintext denied; the response was sent and the socket closed
    Rejected,
}

impl<S: Socket> Negotiated<S> {
    /// The connection to hand to the application, if any
    pub fn connection(&mut self) -> Option<&mut dyn Connection> {
        match self {
            Negotiated::Secure(conn) => Some(conn),
            Negotiated::Plain(conn) => Some(conn),
            Negotiated::Rejected => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Negotiated::Rejected)
    }
}

/// Sniff `socket` and set up the connection its first bytes call for
pub fn negotiate<S: Socket>(
    socket: S,
    context: &SecureContext,
    policy: &InsecurePolicy,
) -> Result<Negotiated<S>> {
    let (transport, io) = sniff(socket);

    match (transport, policy) {
        (Transport::Secure, _) => Ok(Negotiated::Secure(SecureConnection::accept(io, context)?)),
        (Transport::Plain, InsecurePolicy::Allow) => Ok(Negotiated::Plain(PlainConnection::new(io))),
        (Transport::Plain, InsecurePolicy::Deny(body)) => {
            deny(io, body)?;
            Ok(Negotiated::Rejected)
        }
    }
}

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The application was called with a connection of this transport
    Served(Transport),
    /// Plaintext was denied; the application was not called
    Rejected,
}

/// Negotiate, run the application and close
pub fn handle_connection<S, A>(
    socket: S,
    peer: SocketAddr,
    context: &SecureContext,
    settings: &Settings,
    app: &A,
) -> Result<Outcome>
where
    S: Socket,
    A: Application + ?Sized,
{
    let mut negotiated = negotiate(socket, context, settings.insecure())?;

    let transport = match negotiated {
        Negotiated::Secure(_) => Transport::Secure,
        Negotiated::Plain(_) => Transport::Plain,
        Negotiated::Rejected => return Ok(Outcome::Rejected),
    };
    let Some(conn) = negotiated.connection() else {
        return Ok(Outcome::Rejected);
    };

    // Close runs even when the application panics; the panic continues after
    let served = panic::catch_unwind(AssertUnwindSafe(|| app.handle(&mut *conn, peer)));
    let closed = conn.close();

    match served {
        Ok(served) => served?,
        Err(payload) => panic::resume_unwind(payload),
    }
    closed?;
    Ok(Outcome::Served(transport))
}

/// Listening socket plus everything needed to serve connections
pub struct Server {
    listener: TcpListener,
    settings: Arc<Settings>,
    context: Arc<SecureContext>,
    server: ServerSettings,
}

impl Server {
    /// Load the credential and bind `server.host:server.port`
    ///
    /// Unusable certificate material fails here, before the socket is bound.
    pub fn bind(settings: Settings, server: ServerSettings) -> Result<Self> {
        let context = SecureContext::from_settings(&settings)?;
        let listener = listen(&server)?;
        Ok(Self::assemble(listener, settings, context, server))
    }

    /// Serve on an already bound listener
    pub fn from_listener(
        listener: TcpListener,
        settings: Settings,
        server: ServerSettings,
    ) -> Result<Self> {
        let context = SecureContext::from_settings(&settings)?;
        Ok(Self::assemble(listener, settings, context, server))
    }

    fn assemble(
        listener: TcpListener,
        settings: Settings,
        context: SecureContext,
        server: ServerSettings,
    ) -> Self {
        Server {
            listener,
            settings: Arc::new(settings),
            context: Arc::new(context),
            server,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Accept one connection and serve it on the calling thread
    pub fn serve_one<A: Application>(&self, app: &A) -> Result<Outcome> {
        let (stream, peer) = self.listener.accept()?;
        self.prepare(&stream);
        handle_connection(stream, peer, &self.context, &self.settings, app)
    }

    /// Accept connections forever, one thread each
    pub fn serve<A: Application>(self, app: A) -> Result<()> {
        let app = Arc::new(app);

        tracing::info!(
            "listening on {} (plaintext {})",
            self.local_addr()?,
            match self.settings.insecure() {
                InsecurePolicy::Allow => "allowed",
                InsecurePolicy::Deny(_) => "denied",
            }
        );

        for incoming in self.listener.incoming() {
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!("accept: {}", e);
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    tracing::debug!("dropping connection without peer address: {}", e);
                    continue;
                }
            };
            self.prepare(&stream);

            let app = Arc::clone(&app);
            let settings = Arc::clone(&self.settings);
            let context = Arc::clone(&self.context);

            let spawned = thread::Builder::new()
                .name(format!("conn-{}", peer))
                .spawn(move || run_connection(stream, peer, &context, &settings, &*app));
            if let Err(e) = spawned {
                tracing::error!("failed to spawn thread for {}: {}", peer, e);
            }
        }

        Ok(())
    }

    fn prepare(&self, stream: &TcpStream) {
        if self.server.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("set_nodelay failed: {}", e);
            }
        }
    }
}

/// Serve one connection, keeping failures and panics inside this thread
fn run_connection<A: Application + ?Sized>(
    stream: TcpStream,
    peer: SocketAddr,
    context: &SecureContext,
    settings: &Settings,
    app: &A,
) {
    tracing::debug!("New connection from {}", peer);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        handle_connection(stream, peer, context, settings, app)
    }));

    match result {
        Ok(Ok(Outcome::Served(transport))) => {
            tracing::debug!("connection {} ({}) closed cleanly", peer, transport.as_str())
        }
        Ok(Ok(Outcome::Rejected)) => {
            tracing::debug!("connection {} rejected: plaintext not allowed", peer)
        }
        Ok(Err(e)) => tracing::debug!("connection {} ended: {}", peer, e),
        Err(_) => tracing::error!("connection {} handler panicked", peer),
    }
}

fn listen(server: &ServerSettings) -> Result<TcpListener> {
    let addr = (server.host.as_str(), server.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::config(format!("cannot resolve {}", server.address())))?;

    let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(server.reuse_address)?;
    socket.bind(&addr.into())?;
    socket.listen(server.backlog)?;

    Ok(socket.into())
}

/// Bind `server.host:server.port` and serve until the process exits
pub fn run<A: Application>(settings: Settings, server: ServerSettings, app: A) -> Result<()> {
    Server::bind(settings, server)?.serve(app)
}

/// Serve on an existing listener until the process exits
pub fn run_listener<A: Application>(
    listener: TcpListener,
    settings: Settings,
    server: ServerSettings,
    app: A,
) -> Result<()> {
    Server::from_listener(listener, settings, server)?.serve(app)
}
