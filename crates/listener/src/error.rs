use std::borrow::Cow;
use std::string::FromUtf8Error;

use micro_transport::protocol::{BoxError, SendError};
use thiserror::Error;

/// An event the dispatcher cannot classify.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("don't know how to handle this {event} event")]
    TransportUnrecognized { event: &'static str },
}

/// A listener that can't be installed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("a listener needs at least one request handler")]
    NoHandlers,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("malformed transport input: {reason}")]
    MalformedTransportInput { reason: String },
}

impl BuildError {
    pub fn malformed<S: ToString>(str: S) -> Self {
        Self::MalformedTransportInput { reason: str.to_string() }
    }
}

/// A handler that did not produce a usable result.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler '{handler}' failed: {source}")]
    Failed { handler: Cow<'static, str>, source: BoxError },

    #[error("handler '{handler}' panicked: {message}")]
    Panicked { handler: Cow<'static, str>, message: String },

    #[error("handler '{handler}' returned a malformed response: {reason}")]
    MalformedResponse { handler: Cow<'static, str>, reason: String },
}

impl HandlerError {
    pub fn handler(&self) -> &str {
        match self {
            HandlerError::Failed { handler, .. }
            | HandlerError::Panicked { handler, .. }
            | HandlerError::MalformedResponse { handler, .. } => handler,
        }
    }
}

#[derive(Debug, Error)]
pub enum SendResponseError {
    #[error("HTTP headers/response was already sent, will not send this one")]
    AlreadyResponded,

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: SendError,
    },

    #[error("response body error: {source}")]
    Body { source: BoxError },
}

impl SendResponseError {
    pub fn body<E: Into<BoxError>>(e: E) -> Self {
        Self::Body { source: e.into() }
    }
}

/// Errors reading a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body has been consumed")]
    AlreadyConsumed,

    #[error("failed to read request body: {source}")]
    Read { source: BoxError },

    #[error("request body is not valid utf-8: {source}")]
    Utf8 {
        #[from]
        source: FromUtf8Error,
    },
}

impl BodyError {
    pub fn read<E: Into<BoxError>>(e: E) -> Self {
        Self::Read { source: e.into() }
    }
}
