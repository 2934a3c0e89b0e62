use std::net::SocketAddr;

use micro_transport::Socket;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IpFamily {
    #[serde(rename = "IPv4")]
    V4,
    #[serde(rename = "IPv6")]
    V6,
}

impl IpFamily {
    pub fn of(address: &SocketAddr) -> Self {
        match address {
            SocketAddr::V4(_) => IpFamily::V4,
            SocketAddr::V6(_) => IpFamily::V6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IpFamily::V4 => "IPv4",
            IpFamily::V6 => "IPv6",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsInfo {
    /// `TLSv1.1`, `TLSv1.2` or `TLSv1.3`.
    pub proto: &'static str,
    /// Standard cipher suite name.
    pub cipher: String,
}

/// Connection metadata of a request, taken once when the request is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetInfo {
    pub remote_address: String,
    pub ip_family: IpFamily,
    pub local_address: Option<String>,
    pub local_port: Option<u16>,
    pub tls: Option<TlsInfo>,
}

impl NetInfo {
    /// Reads what the socket already knows, never blocking and never failing.
    ///
    /// The address family is the one of the local end when it is known, the remote end
    /// otherwise.
    pub fn from_socket(socket: &Socket) -> Self {
        let remote = socket.remote_addr();
        let local = socket.local_addr();

        Self {
            remote_address: remote.ip().to_string(),
            ip_family: IpFamily::of(local.as_ref().unwrap_or(&remote)),
            local_address: local.map(|address| address.ip().to_string()),
            local_port: local.map(|address| address.port()),
            tls: socket.tls().map(|session| TlsInfo { proto: session.version.as_str(), cipher: session.cipher.clone() }),
        }
    }
}
