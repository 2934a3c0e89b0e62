//! Events emitted by a [`crate::Server`].
//!
//! Every HTTP/1.x request produces one [`EventKind::Request`] event. Every HTTP/2 stream
//! produces one [`EventKind::Stream`] event followed by a compatibility
//! [`RequestEvent::Http2`] request event describing the same stream, so a listener that
//! subscribes to both kinds sees HTTP/2 work twice and has to pick one.

use std::fmt;

use crate::http1::{IncomingMessage, ServerResponse};
use crate::http2::{Http2ServerRequest, ServerStream};
use crate::protocol::{BoxError, RawHeaders};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Request,
    Stream,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ServerEvent {
    Request(RequestEvent),
    Stream(StreamEvent),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Request(_) => EventKind::Request,
            ServerEvent::Stream(_) => EventKind::Stream,
        }
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RequestEvent {
    /// A request and its response on an HTTP/1.x connection.
    Http1 { request: IncomingMessage, response: ServerResponse },
    /// Request-style view of an HTTP/2 stream that was also announced as a [`StreamEvent`].
    Http2(Http2ServerRequest),
}

/// A new HTTP/2 stream and the header block that opened it.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub stream: ServerStream,
    pub headers: RawHeaders,
}

/// Receives server events.
///
/// Listeners run on the connection task and must not block: anything long running is
/// expected to be spawned. An error is fatal for the exchange that produced the event.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: &ServerEvent) -> Result<(), BoxError>;
}

impl<F> EventListener for F
where
    F: Fn(&ServerEvent) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &ServerEvent) -> Result<(), BoxError> {
        (self)(event)
    }
}

/// Handle returned by [`crate::Server::add_listener`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}
