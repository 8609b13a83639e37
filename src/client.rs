//! Gemini client with trust-on-first-use server verification
//!
//! Every fetch opens a fresh TLS connection, fingerprints the server's public
//! key and checks it against the trust store before any request is sent.
//! Nothing is written to the server until the key has been accepted.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use rustls::{ClientConnection, StreamOwned};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::tls;
use crate::tofu::{self, MismatchPolicy, VerificationOutcome};
use crate::trust_store::{Address, FileTrustStore, Fingerprint, TrustStore};
use crate::uri::CanonicalUri;

/// Longest request URI a Gemini server has to accept
pub const MAX_REQUEST_LEN: usize = 1024;

pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// An established connection whose server key has been accepted
pub struct Connection {
    pub address: Address,
    pub fingerprint: Fingerprint,
    pub outcome: VerificationOutcome,
    pub stream: TlsStream,
}

/// Raw bytes returned by the server, uninterpreted
#[derive(Debug, Clone)]
pub struct Response {
    pub address: Address,
    pub outcome: VerificationOutcome,
    pub body: Vec<u8>,
}

/// Gemini client
///
/// Holds the TLS configuration and the trust store shared by every fetch.
pub struct Client {
    config: ClientConfig,
    tls_config: Arc<rustls::ClientConfig>,
    no_sni_config: Arc<rustls::ClientConfig>,
    trust_store: Box<dyn TrustStore>,
}

impl Client {
    /// Create a client backed by the file trust store at `config.trust_dir`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let store = FileTrustStore::open(&config.trust_dir)?;
        Self::with_trust_store(config, store)
    }

    /// Create a client with another trust store implementation
    pub fn with_trust_store(
        config: ClientConfig,
        trust_store: impl TrustStore + 'static,
    ) -> Result<Self> {
        let tls_config = tls::client_config()?;
        Ok(Self {
            config,
            no_sni_config: Arc::new(tls::without_sni(&tls_config)),
            tls_config: Arc::new(tls_config),
            trust_store: Box::new(trust_store),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn trust_store(&self) -> &dyn TrustStore {
        self.trust_store.as_ref()
    }

    /// Fetch `uri` using the configured mismatch policy
    pub fn fetch(&self, uri: &CanonicalUri) -> Result<Response> {
        self.fetch_with_policy(uri, self.config.on_key_mismatch)
    }

    /// Fetch `uri`, handling a changed server key with `policy`
    pub fn fetch_with_policy(
        &self,
        uri: &CanonicalUri,
        policy: MismatchPolicy,
    ) -> Result<Response> {
        let request = format!("{}\r\n", uri.without_fragment());
        let len = request.len() - 2;
        if len > MAX_REQUEST_LEN {
            return Err(Error::RequestTooLong { len });
        }

        let Connection {
            address,
            outcome,
            mut stream,
            ..
        } = self.connect(&uri.address(), policy)?;

        stream
            .write_all(request.as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|e| {
                Error::Transport(format!("Failed to send request to {}: {}", address, e))
            })?;

        let mut body = Vec::new();
        match stream.read_to_end(&mut body) {
            Ok(_) => {}
            // Plenty of servers drop the socket without a close_notify
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(address = %address, "connection closed without close_notify");
            }
            Err(e) => {
                return Err(Error::Transport(format!(
                    "Failed to read response from {}: {}",
                    address, e
                )))
            }
        }
        debug!(address = %address, bytes = body.len(), "response received");

        Ok(Response {
            address,
            outcome,
            body,
        })
    }

    /// Open a TLS connection to `addr` and verify the server key
    ///
    /// 1. Resolve and connect over TCP
    /// 2. Complete the TLS handshake (no chain or hostname validation), without
    ///    SNI when the host is not a DNS name
    /// 3. Fingerprint the server certificate's public key
    /// 4. Check the fingerprint against the trust store
    /// 5. On a mismatch, apply `policy`
    pub fn connect(&self, addr: &Address, policy: MismatchPolicy) -> Result<Connection> {
        let sock = self.tcp_connect(addr)?;

        let (tls_config, name) = match tls::server_name(&addr.host) {
            Some(name) => (self.tls_config.clone(), name),
            None => {
                debug!(address = %addr, "host is not a DNS name, connecting without SNI");
                (self.no_sni_config.clone(), tls::placeholder_server_name())
            }
        };
        let conn = ClientConnection::new(tls_config, name)
            .map_err(|e| Error::Tls(format!("Failed to start TLS session: {}", e)))?;
        let mut stream = StreamOwned::new(conn, sock);
        while stream.conn.is_handshaking() {
            stream
                .conn
                .complete_io(&mut stream.sock)
                .map_err(|e| {
                    Error::Transport(format!("TLS handshake with {} failed: {}", addr, e))
                })?;
        }

        let cert = stream
            .conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| Error::Tls(format!("{} presented no certificate", addr)))?;
        let fingerprint = tls::cert_pubkey_fingerprint(cert)?;
        debug!(address = %addr, %fingerprint, "TLS handshake complete");

        let outcome = tofu::verify(self.trust_store(), addr, &fingerprint)?;
        if let VerificationOutcome::Mismatch { stored } = &outcome {
            tofu::apply_mismatch_policy(self.trust_store(), addr, stored, &fingerprint, policy)?;
        }

        Ok(Connection {
            address: addr.clone(),
            fingerprint,
            outcome,
            stream,
        })
    }

    fn tcp_connect(&self, addr: &Address) -> Result<TcpStream> {
        let candidates = (addr.host.as_str(), addr.port)
            .to_socket_addrs()
            .map_err(|e| Error::Transport(format!("Failed to resolve {}: {}", addr, e)))?;

        let mut last_error = None;
        for sock_addr in candidates {
            let attempt = match self.config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&sock_addr, timeout),
                None => TcpStream::connect(sock_addr),
            };
            match attempt {
                Ok(sock) => {
                    sock.set_read_timeout(self.config.read_timeout)
                        .and_then(|()| sock.set_write_timeout(self.config.read_timeout))
                        .map_err(|e| {
                            Error::Transport(format!("Failed to set socket timeout: {}", e))
                        })?;
                    debug!(address = %addr, peer = %sock_addr, "connected");
                    return Ok(sock);
                }
                Err(e) => {
                    debug!(
                        address = %addr,
                        peer = %sock_addr,
                        error = %e,
                        "connect attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Transport(match last_error {
            Some(e) => format!("Failed to connect to {}: {}", addr, e),
            None => format!("{} resolved to no addresses", addr),
        }))
    }
}
