//! End-to-end trust-on-first-use against a local TLS server

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gemini_tofu::tls::cert_pubkey_fingerprint;
use gemini_tofu::{
    normalize, Address, CanonicalUri, Client, ClientConfig, Error, Fingerprint, MismatchPolicy,
    TrustStore, VerificationOutcome,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConnection, StreamOwned};

const BODY: &[u8] = b"20 text/gemini\r\n# Hello\n";

struct ServerKey {
    config: Arc<rustls::ServerConfig>,
    fingerprint: Fingerprint,
}

fn server_key() -> ServerKey {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let fingerprint = cert_pubkey_fingerprint(certified.cert.der()).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], key)
        .unwrap();

    ServerKey {
        config: Arc::new(config),
        fingerprint,
    }
}

/// How the server ends a connection after writing the response
#[derive(Clone, Copy)]
enum Close {
    Notify,
    /// Drop the socket without a TLS close_notify
    Abrupt,
}

/// What the server saw on one connection
struct Served {
    request: String,
    sni: Option<String>,
}

/// Serve one connection per config, in order
fn serve(configs: Vec<Arc<rustls::ServerConfig>>, close: Close) -> (u16, JoinHandle<Vec<Served>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut served = Vec::new();
        for config in configs {
            let (sock, _) = listener.accept().unwrap();
            let conn = ServerConnection::new(config).unwrap();
            let mut stream = StreamOwned::new(conn, sock);

            let mut line = String::new();
            // A client that rejected the key hangs up mid-connection
            let read = BufReader::new(&mut stream).read_line(&mut line);
            if !matches!(read, Ok(n) if n > 0) {
                continue;
            }
            served.push(Served {
                request: line,
                sni: stream.conn.server_name().map(str::to_owned),
            });

            stream.write_all(BODY).unwrap();
            if let Close::Notify = close {
                stream.conn.send_close_notify();
            }
            stream.flush().unwrap();
        }
        served
    });

    (port, handle)
}

/// Serve one connection per config and return the request lines received
fn spawn_server(
    configs: Vec<Arc<rustls::ServerConfig>>,
) -> (CanonicalUri, JoinHandle<Vec<String>>) {
    let (port, served) = serve(configs, Close::Notify);
    let handle = thread::spawn(move || {
        let served = served.join().unwrap();
        served.into_iter().map(|s| s.request).collect()
    });

    let uri = normalize(&format!("gemini://127.0.0.1:{port}/hello?q#frag")).unwrap();
    (uri, handle)
}

fn client(dir: &std::path::Path) -> Client {
    Client::new(ClientConfig::default().with_trust_dir(dir)).unwrap()
}

#[test]
fn test_first_seen_then_match() {
    let key = server_key();
    let (uri, server) = spawn_server(vec![key.config.clone(), key.config.clone()]);
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    let first = client.fetch(&uri).unwrap();
    assert_eq!(first.outcome, VerificationOutcome::FirstSeen);
    assert_eq!(first.body, BODY);
    assert_eq!(first.address, uri.address());
    assert_eq!(
        client.trust_store().lookup(&uri.address()).unwrap(),
        Some(key.fingerprint.clone())
    );

    let second = client.fetch(&uri).unwrap();
    assert_eq!(second.outcome, VerificationOutcome::Match);

    let requests = server.join().unwrap();
    let expected = format!("gemini://127.0.0.1:{}/hello?q\r\n", uri.port());
    assert_eq!(requests, vec![expected.clone(), expected]);
}

#[test]
fn test_changed_key_rejected_by_default() {
    let (old, new) = (server_key(), server_key());
    let (uri, server) = spawn_server(vec![old.config.clone(), new.config.clone()]);
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    client.fetch(&uri).unwrap();
    match client.fetch(&uri) {
        Err(Error::KeyMismatch {
            address,
            stored,
            observed,
        }) => {
            assert_eq!(address, Address::new("127.0.0.1", uri.port()));
            assert_eq!(stored, old.fingerprint);
            assert_eq!(observed, new.fingerprint);
        }
        other => panic!("expected KeyMismatch, got {:?}", other.map(|r| r.outcome)),
    }
    assert_eq!(
        client.trust_store().lookup(&uri.address()).unwrap(),
        Some(old.fingerprint)
    );

    // No request was sent over the rejected connection
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn test_changed_key_ignored() {
    let (old, new) = (server_key(), server_key());
    let (uri, server) = spawn_server(vec![
        old.config.clone(),
        new.config.clone(),
        new.config.clone(),
    ]);
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    client.fetch(&uri).unwrap();
    let ignored = client.fetch_with_policy(&uri, MismatchPolicy::Ignore).unwrap();
    assert_eq!(
        ignored.outcome,
        VerificationOutcome::Mismatch {
            stored: old.fingerprint.clone()
        }
    );
    assert_eq!(ignored.body, BODY);

    // The stale record stays, so the next connection mismatches again
    assert!(matches!(client.fetch(&uri), Err(Error::KeyMismatch { .. })));
    assert_eq!(
        client.trust_store().lookup(&uri.address()).unwrap(),
        Some(old.fingerprint)
    );
    assert_eq!(server.join().unwrap().len(), 2);
}

#[test]
fn test_changed_key_replaced() {
    let (old, new) = (server_key(), server_key());
    let (uri, server) = spawn_server(vec![
        old.config.clone(),
        new.config.clone(),
        new.config.clone(),
    ]);
    let tmp = tempfile::tempdir().unwrap();
    let client = Client::new(
        ClientConfig::default()
            .with_trust_dir(tmp.path())
            .with_mismatch_policy(MismatchPolicy::Replace),
    )
    .unwrap();

    client.fetch(&uri).unwrap();
    let replaced = client.fetch(&uri).unwrap();
    assert!(matches!(replaced.outcome, VerificationOutcome::Mismatch { .. }));
    assert_eq!(
        client.trust_store().lookup(&uri.address()).unwrap(),
        Some(new.fingerprint)
    );

    let after = client.fetch(&uri).unwrap();
    assert_eq!(after.outcome, VerificationOutcome::Match);
    assert_eq!(server.join().unwrap().len(), 3);
}

#[test]
fn test_close_without_close_notify() {
    let key = server_key();
    let (port, server) = serve(vec![key.config.clone()], Close::Abrupt);
    let uri = normalize(&format!("gemini://127.0.0.1:{port}/")).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    let response = client.fetch(&uri).unwrap();
    assert_eq!(response.body, BODY);
    assert_eq!(response.outcome, VerificationOutcome::FirstSeen);
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn test_plaintext_peer_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        // Not a TLS record
        let _ = sock.write_all(BODY);
        let _ = sock.flush();
    });

    let uri = normalize(&format!("gemini://127.0.0.1:{port}/")).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    match client.fetch(&uri) {
        Err(Error::Transport(_)) => {}
        other => panic!("expected Transport error, got {:?}", other.map(|r| r.body)),
    }
    assert!(client.trust_store().entries().unwrap().is_empty());
    server.join().unwrap();
}

#[test]
fn test_non_dns_host_connects_without_sni() {
    let key = server_key();
    let (port, server) = serve(vec![key.config.clone()], Close::Notify);
    // Resolves to 127.0.0.1 but is neither a DNS name nor an IP literal to rustls
    let uri = normalize(&format!("gemini://127.1:{port}/")).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    let response = client.fetch(&uri).unwrap();
    assert_eq!(response.body, BODY);
    assert_eq!(response.address, Address::new("127.1", port));

    let served = server.join().unwrap();
    assert_eq!(served.len(), 1);
    assert_eq!(served[0].sni, None);
}

#[test]
fn test_dns_host_sends_sni() {
    let key = server_key();
    let (port, server) = serve(vec![key.config.clone()], Close::Notify);
    let uri = normalize(&format!("gemini://localhost:{port}/")).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    client.fetch(&uri).unwrap();
    let served = server.join().unwrap();
    assert_eq!(served[0].sni.as_deref(), Some("localhost"));
}
