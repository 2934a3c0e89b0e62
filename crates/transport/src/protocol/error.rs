use std::error::Error;
use std::io;
use thiserror::Error;

/// Boxed error used at the listener seam.
pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("http2 error: {source}")]
    Http2Error {
        #[from]
        source: h2::Error,
    },

    #[error("listener failed: {source}")]
    ListenerError { source: BoxError },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TransportError {
    pub fn listener<E: Into<BoxError>>(e: E) -> Self {
        Self::ListenerError { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("connection closed before the message was complete")]
    UnexpectedEof,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Whether the peer is gone, as opposed to having sent something malformed.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::UnexpectedEof | Self::Io { .. })
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("response headers were already sent")]
    HeadersAlreadySent,

    #[error("response headers must be sent before the body")]
    HeadersNotSent,

    #[error("the output has been closed")]
    Closed,

    #[error("http2 error: {source}")]
    Http2 {
        #[from]
        source: h2::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors surfaced while reading a request body.
#[derive(Error, Debug)]
pub enum BodyError {
    #[error("request body error: {source}")]
    Http1 {
        #[from]
        source: ParseError,
    },

    #[error("request body error: {source}")]
    Http2 {
        #[from]
        source: h2::Error,
    },

    #[error("request body has already been claimed by another reader")]
    AlreadyClaimed,
}
