//! Writes a [`Response`] onto the transport that delivered its request.
//!
//! The head goes out once per request: a second attempt fails with
//! [`SendResponseError::AlreadyResponded`] and leaves what was written untouched. The body
//! is streamed frame by frame, each write resolving only once the transport took it.

use http::header::{self, HeaderName};
use http::{HeaderMap, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use micro_transport::protocol::{PayloadSize, SendError};
use micro_transport::{ServerResponse, ServerStream};
use tracing::{debug, trace};

use crate::body::ResponseBody;
use crate::context::TransportKind;
use crate::error::SendResponseError;
use crate::headers::Headers;
use crate::response::{Head, Response};

/// Headers that only mean something on an HTTP/1.x connection.
static CONNECTION_SPECIFIC: [HeaderName; 5] =
    [header::CONNECTION, header::TRANSFER_ENCODING, header::UPGRADE, header::TE, HeaderName::from_static("keep-alive")];

/// Where the response of one request is written.
#[derive(Debug, Clone)]
pub struct ResponseOutput {
    kind: OutputKind,
}

#[derive(Debug, Clone)]
enum OutputKind {
    Http1(ServerResponse),
    Http2 { stream: ServerStream, sensitive: Vec<HeaderName>, head_request: bool },
}

impl ResponseOutput {
    pub fn http1(response: ServerResponse) -> Self {
        Self { kind: OutputKind::Http1(response) }
    }

    /// A stream output. Response headers named in `sensitive` are sent never-indexed.
    ///
    /// With `head_request` set, the stream ends together with the response head.
    pub fn http2(stream: ServerStream, sensitive: Vec<HeaderName>, head_request: bool) -> Self {
        Self { kind: OutputKind::Http2 { stream, sensitive, head_request } }
    }

    pub fn transport(&self) -> TransportKind {
        match self.kind {
            OutputKind::Http1(_) => TransportKind::Http1,
            OutputKind::Http2 { .. } => TransportKind::Http2,
        }
    }

    pub fn headers_sent(&self) -> bool {
        match &self.kind {
            OutputKind::Http1(response) => response.headers_sent(),
            OutputKind::Http2 { stream, .. } => stream.headers_sent(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.kind {
            OutputKind::Http1(response) => response.is_closed(),
            OutputKind::Http2 { stream, .. } => stream.is_closed(),
        }
    }

    /// Whether a response with `status` is sent without its body.
    ///
    /// HTTP/1.x responses to `HEAD` are handled by the connection, which still needs the
    /// body size for the framing headers.
    fn omits_body(&self, status: StatusCode) -> bool {
        let head_request = match self.kind {
            OutputKind::Http1(_) => false,
            OutputKind::Http2 { head_request, .. } => head_request,
        };
        head_request || forbids_body(status)
    }

    async fn write(&self, data: bytes::Bytes) -> Result<(), SendError> {
        match &self.kind {
            OutputKind::Http1(response) => response.write(data).await,
            OutputKind::Http2 { stream, .. } => stream.write(data).await,
        }
    }

    async fn end(&self) -> Result<(), SendError> {
        match &self.kind {
            OutputKind::Http1(response) => response.end().await,
            OutputKind::Http2 { stream, .. } => stream.end().await,
        }
    }
}

/// Sends `response` on `output`, resolving once the whole body was written.
pub async fn send_response(output: &ResponseOutput, response: Response) -> Result<(), SendResponseError> {
    if output.headers_sent() {
        return Err(SendResponseError::AlreadyResponded);
    }

    if output.is_closed() {
        trace!("output already closed, nothing to send");
        output.end().await?;
        return Ok(());
    }

    let (head, body) = response.into_parts();
    let no_body = body.is_end_stream() || output.omits_body(head.status);

    let sent = match &output.kind {
        OutputKind::Http1(writer) => {
            let payload_size = payload_size(&head.headers, &body);
            writer.write_head(head.status, head.status_text, head.headers.into_map(), payload_size).await
        }
        OutputKind::Http2 { stream, sensitive, .. } => stream.respond(http2_head(head, sensitive), no_body).await,
    };
    match sent {
        Err(SendError::HeadersAlreadySent) => return Err(SendResponseError::AlreadyResponded),
        result => result?,
    }

    match (no_body, output.transport()) {
        // the stream was finished together with its head
        (true, TransportKind::Http2) => Ok(()),
        (true, TransportKind::Http1) => Ok(output.end().await?),
        (false, _) => pipe(output, body).await,
    }
}

async fn pipe(output: &ResponseOutput, mut body: ResponseBody) -> Result<(), SendResponseError> {
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(SendResponseError::body)?;
        match frame.into_data() {
            Ok(data) if !data.is_empty() => output.write(data).await?,
            Ok(_) => {}
            Err(_) => debug!("skip non-data frame of response body"),
        }
    }
    output.end().await?;
    Ok(())
}

/// Content-length framing when the size is known, chunked otherwise.
fn payload_size(headers: &Headers, body: &ResponseBody) -> PayloadSize {
    if let Some(length) = body.size_hint().exact() {
        return PayloadSize::new_length(length);
    }

    headers
        .first(header::CONTENT_LENGTH.as_str())
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(PayloadSize::Chunked, PayloadSize::new_length)
}

/// 1xx, 204 and 304 responses never have a body.
fn forbids_body(status: StatusCode) -> bool {
    status.is_informational() || matches!(status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
}

fn http2_head(head: Head, sensitive: &[HeaderName]) -> http::Response<()> {
    let mut headers: HeaderMap = head.headers.into_map();
    for name in &CONNECTION_SPECIFIC {
        headers.remove(name);
    }
    if forbids_body(head.status) {
        headers.remove(header::CONTENT_LENGTH);
    }
    for (name, value) in headers.iter_mut() {
        if sensitive.contains(name) {
            value.set_sensitive(true);
        }
    }

    let mut response = http::Response::new(());
    *response.status_mut() = head.status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::borrow::Cow;

    fn head(fields: &[(&'static str, &'static str)]) -> Head {
        let mut headers = Headers::new();
        for (name, value) in fields {
            headers.append(*name, HeaderValue::from_static(value));
        }
        Head { status: StatusCode::CREATED, status_text: Cow::Borrowed("Created"), headers }
    }

    #[test]
    fn http2_head_strips_connection_headers() {
        let head = head(&[("connection", "keep-alive"), ("keep-alive", "timeout=5"), ("x-token", "secret"), ("content-type", "text/plain")]);

        let response = http2_head(head, &[HeaderName::from_static("x-token")]);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("connection").is_none());
        assert!(response.headers().get("keep-alive").is_none());
        assert!(response.headers()["x-token"].is_sensitive());
        assert!(!response.headers()["content-type"].is_sensitive());
    }

    #[test]
    fn bodiless_statuses_lose_content_length_on_http2() {
        let mut head = head(&[("content-length", "4"), ("etag", "\"v1\"")]);
        head.status = StatusCode::NOT_MODIFIED;

        let response = http2_head(head, &[]);

        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.headers()["etag"], "\"v1\"");
        assert!(forbids_body(StatusCode::NO_CONTENT));
        assert!(forbids_body(StatusCode::CONTINUE));
        assert!(!forbids_body(StatusCode::OK));
    }

    #[test]
    fn payload_size_prefers_the_body() {
        let headers = Headers::new();
        assert_eq!(payload_size(&headers, &ResponseBody::from("four")), PayloadSize::Length(4));
        assert_eq!(payload_size(&headers, &ResponseBody::empty()), PayloadSize::Empty);

        let stream = ResponseBody::stream(http_body_util::StreamBody::new(futures::stream::empty::<
            Result<http_body::Frame<bytes::Bytes>, std::io::Error>,
        >()));
        assert_eq!(payload_size(&headers, &stream), PayloadSize::Chunked);

        let head = head(&[("content-length", "12")]);
        assert_eq!(payload_size(&head.headers, &stream), PayloadSize::Length(12));
    }
}
