//! Plain TCP or TLS-over-TCP streams to a Redis endpoint.
//!
//! The TLS handshake is driven to completion inside [`connect`], so
//! certificate and protocol failures surface as [`ConnectError::Tls`]
//! rather than as an opaque read error on the first command.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("dns resolution failed for {address}: {reason}")]
    Dns { address: String, reason: String },

    #[error("connection refused by {0}")]
    Refused(String),

    #[error("connect to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("tls: {0}")]
    Tls(String),
}

impl ConnectError {
    /// Whether the connect attempt ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConnectError::Io { source, .. }
                if matches!(source.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
        )
    }
}

/// Underlying transport: plain TCP or TLS over TCP.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tls = matches!(self, Transport::Tls(_));
        f.debug_struct("Transport").field("tls", &tls).finish()
    }
}

impl Transport {
    fn tcp_stream(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.sock,
        }
    }

    /// Bound the next reads and writes by `timeout`, which must be non-zero.
    pub fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        let stream = self.tcp_stream();
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))
    }

    pub fn shutdown(&self) {
        let _ = self.tcp_stream().shutdown(std::net::Shutdown::Both);
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

/// Client TLS settings.
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// TLS with the Mozilla root certificate store.
    pub fn with_webpki_roots() -> Result<Self, ConnectError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::Tls(format!("protocol versions: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }
}

impl From<Arc<rustls::ClientConfig>> for TlsConfig {
    fn from(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self { client_config }
    }
}

/// Open a stream to `host:port`. Connecting and the TLS handshake
/// together finish within `timeout`; later reads and writes start out
/// bounded by it until [`Transport::set_timeout`] narrows them.
pub fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
    tls: Option<&TlsConfig>,
) -> Result<Transport, ConnectError> {
    let deadline = Instant::now() + timeout;
    let address = format!("{host}:{port}");
    let addr = resolve(&address)?;

    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        if e.kind() == io::ErrorKind::ConnectionRefused {
            ConnectError::Refused(address.clone())
        } else {
            ConnectError::Io {
                address: address.clone(),
                source: e,
            }
        }
    })?;

    let io_err = |source: io::Error| ConnectError::Io {
        address: address.clone(),
        source,
    };
    stream.set_read_timeout(Some(timeout)).map_err(io_err)?;
    stream.set_write_timeout(Some(timeout)).map_err(io_err)?;
    let _ = stream.set_nodelay(true);

    debug!(%address, tls = tls.is_some(), "established tcp connection");

    let Some(tls) = tls else {
        return Ok(Transport::Plain(stream));
    };

    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| ConnectError::Tls(format!("invalid server name '{host}': {e}")))?;
    let mut session = rustls::ClientConnection::new(Arc::clone(&tls.client_config), server_name)
        .map_err(|e| ConnectError::Tls(format!("session creation: {e}")))?;

    let mut stream = stream;
    while session.is_handshaking() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io_err(io::Error::new(
                io::ErrorKind::TimedOut,
                "tls handshake did not finish in time",
            )));
        }
        stream.set_read_timeout(Some(remaining)).map_err(io_err)?;
        stream.set_write_timeout(Some(remaining)).map_err(io_err)?;
        session.complete_io(&mut stream).map_err(|e| {
            if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                ConnectError::Io {
                    address: address.clone(),
                    source: e,
                }
            } else {
                ConnectError::Tls(format!("handshake with {address}: {e}"))
            }
        })?;
    }

    Ok(Transport::Tls(Box::new(rustls::StreamOwned::new(session, stream))))
}

fn resolve(address: &str) -> Result<SocketAddr, ConnectError> {
    address
        .to_socket_addrs()
        .map_err(|e| ConnectError::Dns {
            address: address.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| ConnectError::Dns {
            address: address.to_string(),
            reason: "no addresses returned".to_string(),
        })
}
