//! The transport-agnostic request handed to handlers.

use bytes::Bytes;
use http::Method;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::body::{BoxBody, RequestBody};
use crate::error::BodyError;
use crate::headers::Headers;

/// Fires when the connection or stream that carried a request goes away.
///
/// The signal only ever goes from active to aborted. It does not stop a running handler,
/// handlers that want to give up early can await [`AbortSignal::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh signal that fires together with `parent`.
    pub(crate) fn child_of(parent: &CancellationToken) -> Self {
        Self { token: parent.child_token() }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn abort(&self) {
        self.token.cancel();
    }
}

/// An inbound request, the same whichever transport delivered it.
///
/// Immutable once built. Clones are cheap to hand to several handlers and share the body
/// and the abort signal.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Option<RequestBody>,
    signal: AbortSignal,
    referrer: Option<String>,
}

impl Request {
    pub(crate) fn from_parts(method: Method, url: Url, headers: Headers, body: Option<RequestBody>, signal: AbortSignal) -> Self {
        let referrer = headers.get("referer").or_else(|| headers.get("referrer"));
        Self { method, url, headers, body, signal, referrer }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// The body, absent for `GET` and `HEAD`.
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Takes the body stream. A request without body yields an empty stream.
    pub fn take_body(&self) -> Result<BoxBody, BodyError> {
        match &self.body {
            Some(body) => body.take(),
            None => Ok(BoxBody::default()),
        }
    }

    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        match &self.body {
            Some(body) => body.bytes().await,
            None => Ok(Bytes::new()),
        }
    }

    pub async fn text(&self) -> Result<String, BodyError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Decodes the query string into `T`, an absent query decodes like an empty one.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, serde_qs::Error> {
        serde_qs::from_str(self.url.query().unwrap_or_default())
    }

    /// The query string's name/value pairs, percent-decoded and in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url.query_pairs().map(|(name, value)| (name.into_owned(), value.into_owned())).collect()
    }
}
