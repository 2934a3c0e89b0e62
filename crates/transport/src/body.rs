//! Request bodies.
//!
//! [`IncomingBody`] streams a request body from either protocol with backpressure: HTTP/1.x
//! bodies are pulled from the connection one chunk at a time, HTTP/2 bodies release
//! flow-control capacity only as data is consumed.
//!
//! A body is reachable from every clone of the handle that carries it, so it sits in a
//! [`SharedBody`] and can be claimed exactly once.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use h2::RecvStream;
use http_body::{Body, Frame, SizeHint};

use crate::http1::BodyReceiver;
use crate::protocol::BodyError;

pub struct IncomingBody {
    kind: Kind,
}

enum Kind {
    Http1(BodyReceiver),
    Http2(RecvStream),
}

impl IncomingBody {
    pub(crate) fn http1(receiver: BodyReceiver) -> Self {
        Self { kind: Kind::Http1(receiver) }
    }

    pub(crate) fn http2(stream: RecvStream) -> Self {
        Self { kind: Kind::Http2(stream) }
    }
}

impl fmt::Debug for IncomingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Http1(_) => f.write_str("IncomingBody::Http1"),
            Kind::Http2(_) => f.write_str("IncomingBody::Http2"),
        }
    }
}

impl Body for IncomingBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Http1(receiver) => Pin::new(receiver).poll_frame(cx).map_err(BodyError::from),
            Kind::Http2(stream) => match ready!(stream.poll_data(cx)) {
                Some(Ok(bytes)) => {
                    // hand the window back so the peer can keep sending
                    let _ = stream.flow_control().release_capacity(bytes.len());
                    Poll::Ready(Some(Ok(Frame::data(bytes))))
                }
                Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
                None => Poll::Ready(None),
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Http1(receiver) => receiver.is_end_stream(),
            Kind::Http2(stream) => stream.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Http1(receiver) => receiver.size_hint(),
            Kind::Http2(stream) if stream.is_end_stream() => SizeHint::with_exact(0),
            Kind::Http2(_) => SizeHint::default(),
        }
    }
}

/// A request body that any clone of a request handle may claim, once.
#[derive(Clone)]
pub struct SharedBody {
    inner: Arc<Mutex<Option<IncomingBody>>>,
}

impl SharedBody {
    pub(crate) fn new(body: IncomingBody) -> Self {
        Self { inner: Arc::new(Mutex::new(Some(body))) }
    }

    /// Takes the body out. Every later call fails with [`BodyError::AlreadyClaimed`].
    pub fn claim(&self) -> Result<IncomingBody, BodyError> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take().ok_or(BodyError::AlreadyClaimed)
    }

    pub fn is_claimed(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

impl fmt::Debug for SharedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBody").field("claimed", &self.is_claimed()).finish()
    }
}
