//! Handler seams: request handlers, error handlers and the adapters for async closures.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::StatusCode;
use micro_transport::protocol::BoxError;
use tracing::error;

use crate::body::ResponseBody;
use crate::context::HttpContext;
use crate::error::HandlerError;
use crate::headers::Headers;
use crate::request::Request;
use crate::response::{Head, Response};

/// Text of the generic `500` response.
pub const DEFAULT_ERROR_MESSAGE: &str = "Sorry, an unknown error occurred. Please try again later";

/// Handles one request.
///
/// `Ok(None)` means the handler deliberately produced nothing, which is fine for handlers
/// that only log or count. An `Err` is handed to the [`ErrorHandler`].
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn call(&self, request: Request, ctx: &HttpContext) -> Result<Option<Response>, BoxError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Turns a failed handler into a response, or into nothing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, error: HandlerError, ctx: &HttpContext) -> Option<Response>;
}

/// Values a handler closure may return.
pub trait Responder {
    fn into_response(self) -> Option<Response>;
}

impl Responder for Response {
    fn into_response(self) -> Option<Response> {
        Some(self)
    }
}

impl Responder for Option<Response> {
    fn into_response(self) -> Option<Response> {
        self
    }
}

impl Responder for () {
    fn into_response(self) -> Option<Response> {
        None
    }
}

/// A [`RequestHandler`] made from an async closure.
pub struct HandlerFn<F> {
    f: F,
    name: Cow<'static, str>,
}

impl<F> HandlerFn<F> {
    pub fn named(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { f, name: name.into() }
    }
}

/// Wraps `f(request, ctx)` into a [`RequestHandler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f, name: Cow::Borrowed("anonymous") }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut, R, E> RequestHandler for HandlerFn<F>
where
    F: Fn(Request, HttpContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    R: Responder,
    E: Into<BoxError>,
{
    async fn call(&self, request: Request, ctx: &HttpContext) -> Result<Option<Response>, BoxError> {
        (self.f)(request, ctx.clone()).await.map(Responder::into_response).map_err(Into::into)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An [`ErrorHandler`] made from an async closure.
pub struct ErrorHandlerFn<F> {
    f: F,
}

pub fn error_handler_fn<F>(f: F) -> ErrorHandlerFn<F> {
    ErrorHandlerFn { f }
}

impl<F> fmt::Debug for ErrorHandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorHandlerFn")
    }
}

#[async_trait]
impl<F, Fut, R> ErrorHandler for ErrorHandlerFn<F>
where
    F: Fn(HandlerError, HttpContext) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send,
    R: Responder,
{
    async fn handle(&self, error: HandlerError, ctx: &HttpContext) -> Option<Response> {
        (self.f)(error, ctx.clone()).await.into_response()
    }
}

/// Logs the failure and answers with [`default_error_response`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(&self, error: HandlerError, ctx: &HttpContext) -> Option<Response> {
        error!(remote = %ctx.net.remote_address, cause = %error, "server listener failure");
        Some(default_error_response())
    }
}

/// `500` with a fixed plain text body and `connection: close`.
pub fn default_error_response() -> Response {
    let mut headers = Headers::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(DEFAULT_ERROR_MESSAGE.len()));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));

    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let head = Head { status, status_text: Cow::Borrowed(status.canonical_reason().unwrap_or_default()), headers };
    Response::from_parts(head, ResponseBody::once(Bytes::from_static(DEFAULT_ERROR_MESSAGE.as_bytes())))
}
