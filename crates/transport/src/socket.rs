//! Connection metadata.
//!
//! [`ConnectInfo`] is what the acceptor knows about a connection when it is handed to the
//! server. [`Socket`] is the live view shared by every exchange on that connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Negotiated TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// The protocol's standard name, e.g. `TLSv1.3`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a TLS session terminated in front of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSession {
    pub version: TlsVersion,
    /// Standard cipher suite name, e.g. `TLS_AES_128_GCM_SHA256`.
    pub cipher: String,
}

/// What is known about a connection when it is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub remote: SocketAddr,
    pub local: Option<SocketAddr>,
    pub tls: Option<TlsSession>,
}

impl ConnectInfo {
    pub fn new(remote: SocketAddr) -> Self {
        Self { remote, local: None, tls: None }
    }

    pub fn with_local(mut self, local: SocketAddr) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_tls(mut self, tls: TlsSession) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Live, shared view of an accepted connection.
#[derive(Debug)]
pub struct Socket {
    info: ConnectInfo,
    closed: AtomicBool,
}

impl Socket {
    pub fn new(info: ConnectInfo) -> Self {
        Self { info, closed: AtomicBool::new(false) }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.info.remote
    }

    /// The local address, or `None` once the connection has been closed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if self.is_closed() { None } else { self.info.local }
    }

    pub fn tls(&self) -> Option<&TlsSession> {
        self.info.tls.as_ref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.info.tls.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
