//! Raw header blocks and message heads as they come off the wire.
//!
//! Nothing here merges or discards duplicates: [`RawHeaders`] groups every value a peer
//! sent under its lowercase field name, in arrival order, and keeps HTTP/2 pseudo-header
//! names with their leading `:`. Normalization is left to the consumer.

use std::borrow::Cow;
use std::slice;

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

/// Prefix that marks an HTTP/2 pseudo-header field name.
pub const PSEUDO_HEADER_PREFIX: char = ':';

/// A single raw field: a lowercase name and every value received for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    name: String,
    values: Vec<HeaderValue>,
}

impl RawField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[HeaderValue] {
        &self.values
    }

    /// Whether the name carries the HTTP/2 pseudo-header prefix.
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(PSEUDO_HEADER_PREFIX)
    }
}

/// The transport's raw header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHeaders {
    fields: Vec<RawField>,
    sensitive: Vec<HeaderName>,
}

impl RawHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the field called `name`, creating the field on first use.
    pub fn append(&mut self, name: &str, value: HeaderValue) {
        let name = name.to_ascii_lowercase();
        match self.fields.iter_mut().find(|field| field.name == name) {
            Some(field) => field.values.push(value),
            None => self.fields.push(RawField { name, values: vec![value] }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RawField> {
        self.fields.iter().find(|field| field.name.eq_ignore_ascii_case(name))
    }

    /// First value of the field called `name`.
    pub fn first(&self, name: &str) -> Option<&HeaderValue> {
        self.get(name).and_then(|field| field.values.first())
    }

    pub fn iter(&self) -> slice::Iter<'_, RawField> {
        self.fields.iter()
    }

    /// Number of distinct field names.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names the peer asked never to be indexed by header compression.
    pub fn sensitive(&self) -> &[HeaderName] {
        &self.sensitive
    }

    pub fn mark_sensitive(&mut self, name: HeaderName) {
        if !self.sensitive.contains(&name) {
            self.sensitive.push(name);
        }
    }

    /// Returns true if any comma separated token of `name` equals `token`, ignoring case.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|field| {
            field.values.iter().any(|value| {
                value.as_bytes().split(|b| *b == b',').any(|part| part.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
            })
        })
    }

    /// Builds a raw block from an HTTP/2 header map, remembering sensitive field names.
    pub fn extend_from_map(&mut self, map: &HeaderMap) {
        for name in map.keys() {
            for value in map.get_all(name) {
                if value.is_sensitive() {
                    self.mark_sensitive(name.clone());
                }
                self.append(name.as_str(), value.clone());
            }
        }
    }
}

impl<'a> IntoIterator for &'a RawHeaders {
    type Item = &'a RawField;
    type IntoIter = slice::Iter<'a, RawField>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<N: AsRef<str>> FromIterator<(N, HeaderValue)> for RawHeaders {
    fn from_iter<I: IntoIterator<Item = (N, HeaderValue)>>(iter: I) -> Self {
        let mut headers = RawHeaders::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value);
        }
        headers
    }
}

/// An HTTP/1.x request head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    target: String,
    version: Version,
    headers: RawHeaders,
}

impl RequestHead {
    pub fn new(method: Method, target: impl Into<String>, version: Version, headers: RawHeaders) -> Self {
        Self { method, target: target.into(), version, headers }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as it appeared on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &RawHeaders {
        &self.headers
    }

    /// Whether the connection may carry another request after this one.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.headers.contains_token("connection", "close"),
            _ => self.headers.contains_token("connection", "keep-alive"),
        }
    }
}

/// An HTTP/1.x response head, written by [`crate::ServerResponse::write_head`].
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: StatusCode,
    reason: Cow<'static, str>,
    headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode, reason: impl Into<Cow<'static, str>>, headers: HeaderMap) -> Self {
        Self { status, reason: reason.into(), headers }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Whether the response asks to close the connection afterwards.
    pub fn wants_close(&self) -> bool {
        self.headers.get_all(http::header::CONNECTION).iter().any(|value| {
            value.as_bytes().split(|b| *b == b',').any(|part| part.trim_ascii().eq_ignore_ascii_case(b"close"))
        })
    }

    /// Statuses that never carry a body or framing headers: 1xx, 204 and 304.
    pub fn forbids_body(&self) -> bool {
        self.status.is_informational() || matches!(self.status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
    }
}
