//! TCP/TLS connection backend.
//!
//! Provides a [`TcpBackend`] that keeps a plain TCP or TLS-wrapped TCP
//! connection open to the database server. The backend does **no protocol
//! parsing**: it answers the liveness statement by checking that the peer
//! still holds the socket open and rejects every other statement, since
//! executing SQL needs a protocol driver.
//!
//! With TLS enabled the handshake completes inside `connect`, so a peer that
//! does not speak TLS fails there rather than on first use. Liveness checks
//! on a TLS connection read through the session so that alerts and
//! `close_notify` count as a dead connection.
//!
//! # Architecture
//!
//! ```text
//! TcpConnectionFactory::connect(target)
//!   → resolve host:port
//!   → TcpStream::connect_timeout
//!   → [rustls ClientConnection + handshake (if TLS enabled)]
//!     → TcpBackend
//!
//! TcpBackend::execute("SELECT 1") → ping()
//!   → plain: socket peek
//!   → tls:   short read through the TLS session
//! ```

use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use poolwatch_core::{PoolError, PoolResult, QueryResult, is_liveness_query};

use crate::pool::{ConnectionBackend, ConnectionFactory, PoolTarget};

// ── Transport ────────────────────────────────────────────────────────

enum Transport {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

// ── TcpBackend ───────────────────────────────────────────────────────

/// How long a liveness check waits for the peer before calling it alive.
const PING_TIMEOUT: Duration = Duration::from_millis(100);

/// A [`ConnectionBackend`] holding a TCP (optionally TLS) connection.
pub struct TcpBackend {
    transport: Transport,
}

impl std::fmt::Debug for TcpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tls = matches!(self.transport, Transport::Tls(_));
        f.debug_struct("TcpBackend").field("tls", &tls).finish()
    }
}

impl TcpBackend {
    pub fn plain(stream: TcpStream) -> Self {
        Self {
            transport: Transport::Plain(stream),
        }
    }

    pub fn tls(stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>) -> Self {
        Self {
            transport: Transport::Tls(Box::new(stream)),
        }
    }

    /// The underlying TCP stream, regardless of the TLS layer.
    fn tcp_stream(&self) -> &TcpStream {
        match &self.transport {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.sock,
        }
    }
}

impl ConnectionBackend for TcpBackend {
    fn execute(
        &mut self,
        query: &str,
        _params: &[serde_json::Value],
    ) -> PoolResult<QueryResult> {
        if !is_liveness_query(query) {
            return Err(PoolError::Query(
                "tcp transport only answers liveness probes; statements need a protocol driver"
                    .to_string(),
            ));
        }
        if self.ping() {
            Ok(QueryResult::from_rows(vec![
                serde_json::json!({ "?column?": 1 }),
            ]))
        } else {
            Err(PoolError::Connection(
                "connection closed by peer".to_string(),
            ))
        }
    }

    fn ping(&mut self) -> bool {
        let stream = self.tcp_stream();

        // Short read timeout for the check, restored afterwards.
        let original_timeout = stream.read_timeout().ok().flatten();
        if stream.set_read_timeout(Some(PING_TIMEOUT)).is_err() {
            return false;
        }

        let alive = match &mut self.transport {
            Transport::Plain(s) => {
                let mut peek_buf = [0u8; 1];
                match s.peek(&mut peek_buf) {
                    Ok(0) => false, // EOF
                    Ok(_) => true,
                    Err(e) => is_idle_timeout(e.kind()),
                }
            }
            // Reading drives rustls over any pending records: a fatal alert
            // surfaces as an error and `close_notify` as a clean EOF.
            Transport::Tls(s) => {
                let mut buf = [0u8; 1];
                match s.read(&mut buf) {
                    Ok(0) => false,
                    Ok(_) => true,
                    Err(e) => is_idle_timeout(e.kind()),
                }
            }
        };

        let _ = self.tcp_stream().set_read_timeout(original_timeout);
        alive
    }

    fn close(&mut self) {
        let _ = self.tcp_stream().shutdown(std::net::Shutdown::Both);
    }
}

fn is_idle_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

// ── TlsConfig ────────────────────────────────────────────────────────

/// Configuration for TLS connections.
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// TLS config trusting the Mozilla root certificate store.
    pub fn with_system_roots() -> PoolResult<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| PoolError::Connection(format!("tls protocol version error: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    /// TLS config that **skips certificate verification**.
    ///
    /// Encrypts the channel without authenticating the server. Only for
    /// targets configured with `verify_certificates = false`.
    pub fn without_verification() -> PoolResult<Self> {
        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| PoolError::Connection(format!("tls protocol version error: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    /// Build from the `tls` / `verify_certificates` settings.
    pub fn for_settings(verify_certificates: bool) -> PoolResult<Self> {
        if verify_certificates {
            Self::with_system_roots()
        } else {
            Self::without_verification()
        }
    }
}

impl From<Arc<rustls::ClientConfig>> for TlsConfig {
    fn from(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self { client_config }
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

// ── TcpConnectionFactory ─────────────────────────────────────────────

/// Factory creating TCP (optionally TLS) connections to the database server.
pub struct TcpConnectionFactory {
    read_timeout: Duration,
    connect_timeout: Duration,
    tls_config: Option<TlsConfig>,
}

impl TcpConnectionFactory {
    pub fn plain(read_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            read_timeout,
            connect_timeout,
            tls_config: None,
        }
    }

    pub fn with_tls(
        read_timeout: Duration,
        connect_timeout: Duration,
        tls_config: TlsConfig,
    ) -> Self {
        Self {
            read_timeout,
            connect_timeout,
            tls_config: Some(tls_config),
        }
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn connect(
        &self,
        target: &PoolTarget,
        _password: Option<&str>,
    ) -> PoolResult<Box<dyn ConnectionBackend>> {
        let addr_str = format!("{}:{}", target.host, target.port);
        let addr = addr_str
            .to_socket_addrs()
            .map_err(|e| PoolError::Connection(format!("dns resolution failed for {addr_str}: {e}")))?
            .next()
            .ok_or_else(|| PoolError::Connection(format!("no address found for {addr_str}")))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| PoolError::Connection(format!("tcp connect to {addr_str}: {e}")))?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|e| PoolError::Connection(format!("set read timeout: {e}")))?;
        let _ = stream.set_nodelay(true);

        tracing::debug!(
            host = %target.host,
            port = target.port,
            tls = self.tls_config.is_some(),
            "established tcp connection"
        );

        match &self.tls_config {
            Some(tls) => {
                let server_name = rustls::pki_types::ServerName::try_from(target.host.as_str())
                    .map_err(|e| {
                        PoolError::Connection(format!(
                            "invalid tls server name '{}': {e}",
                            target.host
                        ))
                    })?
                    .to_owned();
                let mut tls_conn =
                    rustls::ClientConnection::new(Arc::clone(&tls.client_config), server_name)
                        .map_err(|e| PoolError::Connection(format!("tls session creation: {e}")))?;

                let mut stream = stream;
                stream
                    .set_read_timeout(Some(self.connect_timeout))
                    .map_err(|e| PoolError::Connection(format!("set read timeout: {e}")))?;
                while tls_conn.is_handshaking() {
                    tls_conn.complete_io(&mut stream).map_err(|e| {
                        PoolError::Connection(format!("tls handshake with {addr_str}: {e}"))
                    })?;
                }
                stream
                    .set_read_timeout(Some(self.read_timeout))
                    .map_err(|e| PoolError::Connection(format!("set read timeout: {e}")))?;

                tracing::debug!(
                    host = %target.host,
                    protocol = ?tls_conn.protocol_version(),
                    "tls handshake complete"
                );
                Ok(Box::new(TcpBackend::tls(rustls::StreamOwned::new(tls_conn, stream))))
            }
            None => Ok(Box::new(TcpBackend::plain(stream))),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
