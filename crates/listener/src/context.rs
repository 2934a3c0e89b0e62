use std::fmt;

use crate::net_info::NetInfo;

/// The transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// HTTP/1.x, one exchange at a time per connection.
    Http1,
    /// A native HTTP/2 stream.
    Http2,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http1 => "http1",
            TransportKind::Http2 => "h2",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler learns about the connection besides the request itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpContext {
    pub net: NetInfo,
    pub transport: TransportKind,
}

impl HttpContext {
    pub fn new(net: NetInfo, transport: TransportKind) -> Self {
        Self { net, transport }
    }

    pub fn net(&self) -> &NetInfo {
        &self.net
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }
}
