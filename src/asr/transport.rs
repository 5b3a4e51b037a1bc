//! Secure byte stream
//!
//! The session client only needs a handful of socket operations. `TlsStream`
//! provides them over a plain `TcpStream` driven by rustls: reads pump the
//! socket without blocking, writes block until the record is flushed.

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Byte stream consumed by the session client
pub trait SecureStream {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;
    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Bytes that can be read right now without blocking
    fn available(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn close(&mut self);
    fn is_connected(&self) -> bool;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 4096;

struct Session {
    sock: TcpStream,
    tls: ClientConnection,
    plaintext: Vec<u8>,
    eof: bool,
}

impl Session {
    fn read_pending(&mut self) -> io::Result<()> {
        loop {
            match self.tls.read_tls(&mut self.sock) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(_) => {
                    self.tls
                        .process_new_packets()
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.tls.reader().read(&mut chunk) {
                Ok(0) => {
                    // close_notify received
                    self.eof = true;
                    break;
                }
                Ok(n) => self.plaintext.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn flush_tls(&mut self) -> io::Result<()> {
        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.sock)?;
        }
        Ok(())
    }
}

/// TLS client stream verified against the webpki root store
pub struct TlsStream {
    config: Arc<ClientConfig>,
    session: Option<Session>,
}

impl TlsStream {
    pub fn new() -> anyhow::Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            session: None,
        })
    }

    fn pump(&mut self) -> io::Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.sock.set_nonblocking(true)?;
        let result = session.read_pending();
        session.sock.set_nonblocking(false)?;
        result?;
        session.flush_tls()
    }

    fn session_mut(&mut self) -> io::Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "TLS stream not connected"))
    }
}

impl SecureStream for TlsStream {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        self.close();

        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", host)))?;
        let mut sock = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        sock.set_read_timeout(Some(CONNECT_TIMEOUT))?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut tls = ClientConnection::new(self.config.clone(), server_name)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        while tls.is_handshaking() {
            tls.complete_io(&mut sock)?;
        }
        sock.set_read_timeout(None)?;

        tracing::debug!("TLS session established with {}:{}", host, port);
        self.session = Some(Session {
            sock,
            tls,
            plaintext: Vec::new(),
            eof: false,
        });
        Ok(())
    }

    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
        self.session_mut()?.sock.set_nodelay(nodelay)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let session = self.session_mut()?;
        session.tls.writer().write_all(buf)?;
        session.flush_tls()
    }

    fn available(&mut self) -> io::Result<usize> {
        self.pump()?;
        Ok(self.session.as_ref().map_or(0, |s| s.plaintext.len()))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.session.as_ref().is_some_and(|s| s.plaintext.is_empty()) {
            self.pump()?;
        }
        let session = self.session_mut()?;
        let n = buf.len().min(session.plaintext.len());
        buf[..n].copy_from_slice(&session.plaintext[..n]);
        session.plaintext.drain(..n);
        Ok(n)
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.tls.send_close_notify();
            let _ = session.flush_tls();
            let _ = session.sock.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.eof || !s.plaintext.is_empty())
    }
}

impl Drop for TlsStream {
    fn drop(&mut self) {
        self.close();
    }
}
