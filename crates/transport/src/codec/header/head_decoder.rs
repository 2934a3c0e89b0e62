//! Request head decoding for HTTP/1.x.
//!
//! The decoder parses the request line and header block with `httparse`, keeps every
//! field in arrival order in a [`RawHeaders`] block and decides how the payload is framed.
//!
//! # Limits
//!
//! Both limits come from the server configuration:
//!
//! - the number of header fields (`max_headers`)
//! - the size of the whole head, request line included (`max_header_bytes`)

use bytes::{Buf, BytesMut};
use http::{HeaderValue, Method, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadSize, RawHeaders, RequestHead};
use crate::utils::ensure;

pub const DEFAULT_MAX_HEADERS: usize = 64;
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decoder for HTTP/1.x request heads.
#[derive(Debug, Clone, Copy)]
pub struct HeadDecoder {
    max_headers: usize,
    max_header_bytes: usize,
}

impl HeadDecoder {
    pub fn new(max_headers: usize, max_header_bytes: usize) -> Self {
        Self { max_headers, max_header_bytes }
    }
}

impl Default for HeadDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADERS, DEFAULT_MAX_HEADER_BYTES)
    }
}

impl Decoder for HeadDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest possible head is "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 14 {
            return Ok(None);
        }

        let mut fields = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut req = httparse::Request::new(&mut fields);

        let status = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            e => ParseError::invalid_header(e),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= self.max_header_bytes, ParseError::too_large_header(src.len(), self.max_header_bytes));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };
        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let target = req.path.ok_or(ParseError::InvalidUri)?.to_owned();

        let mut headers = RawHeaders::new();
        for field in req.headers.iter() {
            let value = HeaderValue::from_bytes(field.value).map_err(ParseError::invalid_header)?;
            headers.append(field.name, value);
        }

        let payload_size = parse_payload(&headers)?;
        src.advance(body_offset);

        Ok(Some((RequestHead::new(method, target, version, headers), payload_size)))
    }
}

/// Picks the payload framing from `transfer-encoding` and `content-length`.
///
/// See <https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length>.
fn parse_payload(headers: &RawHeaders) -> Result<PayloadSize, ParseError> {
    let te = headers.get("transfer-encoding");
    let cl = headers.get("content-length");

    match (te, cl) {
        (None, None) => Ok(PayloadSize::new_empty()),

        (Some(te), None) => {
            if te.values().last().is_some_and(is_chunked) {
                Ok(PayloadSize::new_chunked())
            } else {
                Err(ParseError::invalid_body("transfer-encoding without chunked as final coding"))
            }
        }

        (None, Some(cl)) => {
            let mut length = None;
            for value in cl.values() {
                let cl_str = value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
                let parsed =
                    cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
                match length {
                    Some(previous) if previous != parsed => {
                        return Err(ParseError::invalid_content_length("conflicting content-length values"));
                    }
                    _ => length = Some(parsed),
                }
            }
            Ok(length.map_or_else(PayloadSize::new_empty, PayloadSize::new_length))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// Chunked must be the last coding of the last `transfer-encoding` value.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
