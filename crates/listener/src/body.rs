use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use micro_transport::SharedBody;
use micro_transport::protocol::BoxError;

use crate::error::BodyError;

pub type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// The body of a [`crate::Request`], read lazily and at most once.
///
/// Clones share the same body: whichever takes it first streams it, everyone else gets
/// [`BodyError::AlreadyConsumed`].
#[derive(Clone)]
pub struct RequestBody {
    source: Arc<Source>,
}

enum Source {
    /// Still held by the transport, possibly shared with other subscriptions.
    Transport(SharedBody),
    Detached(Mutex<Option<BoxBody>>),
}

impl RequestBody {
    pub(crate) fn transport(body: SharedBody) -> Self {
        Self { source: Arc::new(Source::Transport(body)) }
    }

    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let body: BoxBody = body.map_err(Into::into).boxed_unsync();
        Self { source: Arc::new(Source::Detached(Mutex::new(Some(body)))) }
    }

    /// Takes the body stream out.
    pub fn take(&self) -> Result<BoxBody, BodyError> {
        match self.source.as_ref() {
            Source::Transport(shared) => {
                let body = shared.claim().map_err(|_| BodyError::AlreadyConsumed)?;
                Ok(body.map_err(BoxError::from).boxed_unsync())
            }
            Source::Detached(slot) => slot.lock().unwrap_or_else(PoisonError::into_inner).take().ok_or(BodyError::AlreadyConsumed),
        }
    }

    pub fn is_consumed(&self) -> bool {
        match self.source.as_ref() {
            Source::Transport(shared) => shared.is_claimed(),
            Source::Detached(slot) => slot.lock().unwrap_or_else(PoisonError::into_inner).is_none(),
        }
    }

    /// Reads the whole body into memory.
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        let body = self.take()?;
        let collected = body.collect().await.map_err(BodyError::read)?;
        Ok(collected.to_bytes())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source.as_ref() {
            Source::Transport(_) => "transport",
            Source::Detached(_) => "detached",
        };
        f.debug_struct("RequestBody").field("source", &source).field("consumed", &self.is_consumed()).finish()
    }
}

pub struct ResponseBody {
    inner: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Stream(BoxBody),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::empty() } else { Self { inner: Kind::Once(Some(bytes)) } }
    }

    /// A body streamed from `body`, pulled only as fast as the peer accepts it.
    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: Kind::Stream(body.map_err(Into::into).boxed_unsync()) }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Kind::Once(None) => f.write_str("ResponseBody::Empty"),
            Kind::Once(Some(bytes)) => f.debug_tuple("ResponseBody::Once").field(&bytes.len()).finish(),
            Kind::Stream(_) => f.write_str("ResponseBody::Stream"),
        }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::once(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::once(Bytes::from(bytes))
    }
}

impl From<()> for ResponseBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            Kind::Once(option_bytes) => Poll::Ready(option_bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Stream(box_body) => Pin::new(box_body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(box_body) => box_body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(box_body) => box_body.size_hint(),
        }
    }
}
