//! Secure transport for coroutine streams.
//!
//! rustls only provides a sans-io state machine, so this module drives it over
//! a may `TcpStream`. A `TlsStream` is split like a plain stream into halves
//! sharing the session. Each half owns its side of the raw socket and takes
//! the session lock only to decrypt or encrypt what is already in memory.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use may::net::TcpStream;
use may::sync::Mutex;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, Connection, RootCertStore};
use rustls::{ServerConfig, ServerConnection};

use crate::Error;

/// file name of the test CA certificate
pub const CA_FILE: &str = "ca.pem";
/// file name of the test server private key
pub const SERVER_KEY_FILE: &str = "server1.key";
/// file name of the test server certificate chain
pub const SERVER_CERT_FILE: &str = "server1.pem";
/// host name the test server certificate is issued for
pub const TEST_SERVER_HOST: &str = "foo.test.google.fr";

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn cert_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Certificate(format!("{}: {e}", path.display()))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| cert_err(path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| cert_err(path, e))?;
    if certs.is_empty() {
        return Err(cert_err(path, "no certificate found"));
    }
    Ok(certs)
}

/// The credential bundle of the test server, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ServerCredentials {
    ca: Vec<CertificateDer<'static>>,
    config: Arc<ServerConfig>,
}

impl ServerCredentials {
    /// load `ca.pem`, `server1.key` and `server1.pem` from the given directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let ca = load_certs(&dir.join(CA_FILE))?;
        let chain = load_certs(&dir.join(SERVER_CERT_FILE))?;
        let key_path = dir.join(SERVER_KEY_FILE);
        let key = PrivateKeyDer::from_pem_file(&key_path).map_err(|e| cert_err(&key_path, e))?;

        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
        info!("loaded server credentials from {}", dir.display());

        Ok(ServerCredentials {
            ca,
            config: Arc::new(config),
        })
    }

    /// the CA certificates that issued the server certificate
    pub fn ca(&self) -> &[CertificateDer<'static>] {
        &self.ca
    }

    /// the rustls server config
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

/// build a client config that trusts the given CA certificates
pub fn client_config(ca: &[CertificateDer<'static>]) -> Result<Arc<ClientConfig>, Error> {
    let mut roots = RootCertStore::empty();
    for cert in ca {
        roots.add(cert.clone())?;
    }
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// the default test data directory shipped with the crate
pub fn default_testdata_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata"))
}

/// A TLS session over a coroutine tcp stream, after the handshake.
#[derive(Debug)]
pub struct TlsStream {
    sock: TcpStream,
    conn: Connection,
}

impl TlsStream {
    /// run the server side handshake on an accepted stream
    pub fn accept(sock: TcpStream, config: Arc<ServerConfig>) -> Result<Self, Error> {
        let conn = ServerConnection::new(config)?;
        Ok(Self::handshake(sock, conn.into())?)
    }

    /// run the client side handshake on a connected stream
    pub fn connect(
        sock: TcpStream,
        config: Arc<ClientConfig>,
        server_name: &str,
    ) -> Result<Self, Error> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| Error::Certificate(format!("{server_name}: {e}")))?;
        let conn = ClientConnection::new(config, name)?;
        Ok(Self::handshake(sock, conn.into())?)
    }

    fn handshake(mut sock: TcpStream, mut conn: Connection) -> io::Result<Self> {
        while conn.is_handshaking() {
            conn.complete_io(&mut sock)?;
        }
        // e.g. the session tickets queued by the last handshake message
        while conn.wants_write() {
            conn.write_tls(&mut sock)?;
        }
        info!("tls handshake done, peer={:?}", sock.peer_addr());
        Ok(TlsStream { sock, conn })
    }

    /// split into a read half and a write half sharing the session
    pub fn split(mut self) -> io::Result<(TlsReader, TlsWriter)> {
        let rs = self.sock.try_clone()?;
        // the last handshake read may have carried application data too
        let mut plain = Vec::new();
        let closed = drain_plaintext(&mut self.conn, &mut plain)?;
        let session = Arc::new(Mutex::new(self.conn));
        let reader = TlsReader {
            sock: rs,
            session: session.clone(),
            cipher: vec![0; 16 * 1024],
            plain,
            pos: 0,
            closed,
        };
        let writer = TlsWriter {
            sock: self.sock,
            session,
            out: Vec::new(),
        };
        Ok((reader, writer))
    }
}

// move every decrypted byte into `plain`, returns true once the peer closed
fn drain_plaintext(conn: &mut Connection, plain: &mut Vec<u8>) -> io::Result<bool> {
    match conn.reader().read_to_end(plain) {
        // close_notify received
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(true),
        Err(e) => Err(e),
    }
}

// move every pending record into `out`
fn drain_records(conn: &mut Connection, out: &mut Vec<u8>) -> io::Result<()> {
    while conn.wants_write() {
        conn.write_tls(out)?;
    }
    Ok(())
}

fn lock(session: &Mutex<Connection>) -> may::sync::MutexGuard<'_, Connection> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

// the session lock is never held across socket io

/// The read half of a `TlsStream`.
pub struct TlsReader {
    sock: TcpStream,
    session: Arc<Mutex<Connection>>,
    // raw records read from the socket
    cipher: Vec<u8>,
    // decrypted data not yet returned to the caller
    plain: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl TlsReader {
    // decrypt whatever the socket delivered, n == 0 means the peer closed
    //
    // records the session wants to send in reply stay queued in the session,
    // the write half sends them along with its next write
    fn process(&mut self, n: usize) -> io::Result<()> {
        let mut conn = lock(&self.session);
        let mut data = &self.cipher[..n];
        loop {
            conn.read_tls(&mut data)?;
            conn.process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if drain_plaintext(&mut conn, &mut self.plain)? {
                self.closed = true;
            }
            if data.is_empty() {
                break;
            }
        }
        if n == 0 {
            self.closed = true;
        }
        Ok(())
    }
}

impl Read for TlsReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.plain.len() {
                let n = buf.len().min(self.plain.len() - self.pos);
                buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
                self.pos += n;
                if self.pos == self.plain.len() {
                    self.plain.clear();
                    self.pos = 0;
                }
                return Ok(n);
            }
            if self.closed || buf.is_empty() {
                return Ok(0);
            }
            let n = self.sock.read(&mut self.cipher)?;
            self.process(n)?;
        }
    }
}

/// The write half of a `TlsStream`.
pub struct TlsWriter {
    // the write half of the raw socket, only used by this writer
    sock: TcpStream,
    session: Arc<Mutex<Connection>>,
    // encrypted records waiting for the socket
    out: Vec<u8>,
}

impl TlsWriter {
    // send the records collected in `out`, without the session lock
    fn send_records(&mut self) -> io::Result<()> {
        let ret = self.sock.write_all(&self.out);
        self.out.clear();
        ret
    }
}

impl Write for TlsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = {
            let mut conn = lock(&self.session);
            let n = conn.writer().write(buf)?;
            drain_records(&mut conn, &mut self.out)?;
            n
        };
        self.send_records()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        {
            let mut conn = lock(&self.session);
            conn.writer().flush()?;
            drain_records(&mut conn, &mut self.out)?;
        }
        self.send_records()?;
        self.sock.flush()
    }
}

impl Drop for TlsWriter {
    fn drop(&mut self) {
        {
            let mut conn = lock(&self.session);
            conn.send_close_notify();
            drain_records(&mut conn, &mut self.out).ok();
        }
        self.send_records().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use may::go;
    use may::net::TcpListener;

    #[test]
    fn load_test_credentials() {
        let creds = ServerCredentials::load(default_testdata_dir()).unwrap();
        assert_eq!(creds.ca().len(), 1);
        client_config(creds.ca()).unwrap();
    }

    #[test]
    fn missing_credentials() {
        let err = ServerCredentials::load("/no/such/dir").unwrap_err();
        assert!(matches!(err, Error::Certificate(_)), "{err:?}");
    }

    #[test]
    fn echo_over_tls() {
        let creds = ServerCredentials::load(default_testdata_dir()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = creds.config();
        let server = go!(move || {
            let (sock, _) = listener.accept().unwrap();
            let (mut r, mut w) = TlsStream::accept(sock, config).unwrap().split().unwrap();
            let mut buf = [0u8; 5];
            r.read_exact(&mut buf).unwrap();
            w.write_all(&buf).unwrap();
            w.flush().unwrap();
        });

        let sock = TcpStream::connect(addr).unwrap();
        let config = client_config(creds.ca()).unwrap();
        let stream = TlsStream::connect(sock, config, TEST_SERVER_HOST).unwrap();
        let (mut r, mut w) = stream.split().unwrap();
        w.write_all(b"hello").unwrap();
        w.flush().unwrap();
        let mut buf = [0u8; 5];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        server.join().unwrap();
    }

    // write all of `len` bytes on one coroutine while reading the peer's
    fn exchange(stream: TlsStream, len: usize) -> Vec<u8> {
        let (mut r, mut w) = stream.split().unwrap();
        let writer = go!(move || {
            w.write_all(&vec![7u8; len]).unwrap();
            w.flush().unwrap();
        });
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf).unwrap();
        writer.join().unwrap();
        buf
    }

    #[test]
    fn both_peers_write_at_once() {
        // far more than the socket buffers hold
        const LEN: usize = 8 * 1024 * 1024;
        let creds = ServerCredentials::load(default_testdata_dir()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = creds.config();
        let server = go!(move || {
            let (sock, _) = listener.accept().unwrap();
            exchange(TlsStream::accept(sock, config).unwrap(), LEN)
        });

        let sock = TcpStream::connect(addr).unwrap();
        let config = client_config(creds.ca()).unwrap();
        let stream = TlsStream::connect(sock, config, TEST_SERVER_HOST).unwrap();
        let got = exchange(stream, LEN);
        assert!(got.len() == LEN && got.iter().all(|b| *b == 7));
        let got = server.join().unwrap();
        assert!(got.len() == LEN && got.iter().all(|b| *b == 7));
    }

    #[test]
    fn reject_unknown_server_name() {
        let creds = ServerCredentials::load(default_testdata_dir()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = creds.config();
        let server = go!(move || {
            let (sock, _) = listener.accept().unwrap();
            assert!(TlsStream::accept(sock, config).is_err());
        });

        let sock = TcpStream::connect(addr).unwrap();
        let config = client_config(creds.ca()).unwrap();
        assert!(TlsStream::connect(sock, config, "example.com").is_err());
        server.join().unwrap();
    }
}
