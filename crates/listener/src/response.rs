//! The transport-agnostic response a handler returns.

use std::borrow::Cow;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::body::ResponseBody;
use crate::headers::Headers;

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    status_text: Cow<'static, str>,
    headers: Headers,
    body: ResponseBody,
}

impl Response {
    /// A `200 OK` response with `body`.
    pub fn new(body: impl Into<ResponseBody>) -> Self {
        Self { status: StatusCode::OK, status_text: default_text(StatusCode::OK), headers: Headers::new(), body: body.into() }
    }

    /// A response without body.
    pub fn empty(status: StatusCode) -> Self {
        Self { status, status_text: default_text(status), headers: Headers::new(), body: ResponseBody::empty() }
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::new()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn from_parts(head: Head, body: ResponseBody) -> Self {
        Self { status: head.status, status_text: head.status_text, headers: head.headers, body }
    }

    pub fn into_parts(self) -> (Head, ResponseBody) {
        (Head { status: self.status, status_text: self.status_text, headers: self.headers }, self.body)
    }

    /// Checks that the response can be written as a final response.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.status.is_informational() {
            return Err(format!("informational status {} can't be a final response", self.status.as_u16()));
        }
        if self.status_text.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
            return Err(format!("status text {:?} contains control characters", self.status_text));
        }
        Ok(())
    }
}

/// Everything of a [`Response`] but its body.
#[derive(Debug)]
pub struct Head {
    pub status: StatusCode,
    pub status_text: Cow<'static, str>,
    pub headers: Headers,
}

fn default_text(status: StatusCode) -> Cow<'static, str> {
    Cow::Borrowed(status.canonical_reason().unwrap_or_default())
}

/// Builds a [`Response`], keeping the first error until [`ResponseBuilder::body`].
#[derive(Debug)]
pub struct ResponseBuilder {
    inner: Result<Parts, http::Error>,
}

#[derive(Debug)]
struct Parts {
    status: StatusCode,
    status_text: Option<Cow<'static, str>>,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self { inner: Ok(Parts { status: StatusCode::OK, status_text: None, headers: HeaderMap::new() }) }
    }

    pub fn status<T>(self, status: T) -> Self
    where
        StatusCode: TryFrom<T>,
        <StatusCode as TryFrom<T>>::Error: Into<http::Error>,
    {
        self.and_then(|mut parts| {
            parts.status = StatusCode::try_from(status).map_err(Into::into)?;
            Ok(parts)
        })
    }

    /// Overrides the status text, which defaults to the canonical reason of the status.
    pub fn status_text(self, text: impl Into<Cow<'static, str>>) -> Self {
        let text = text.into();
        self.and_then(|mut parts| {
            parts.status_text = Some(text);
            Ok(parts)
        })
    }

    /// Appends a header value.
    pub fn header<K, V>(self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.and_then(|mut parts| {
            let name = HeaderName::try_from(key).map_err(Into::into)?;
            let value = HeaderValue::try_from(value).map_err(Into::into)?;
            parts.headers.append(name, value);
            Ok(parts)
        })
    }

    pub fn body(self, body: impl Into<ResponseBody>) -> Result<Response, http::Error> {
        let parts = self.inner?;
        Ok(Response {
            status: parts.status,
            status_text: parts.status_text.unwrap_or_else(|| default_text(parts.status)),
            headers: Headers::from(parts.headers),
            body: body.into(),
        })
    }

    fn and_then<F>(self, f: F) -> Self
    where
        F: FnOnce(Parts) -> Result<Parts, http::Error>,
    {
        Self { inner: self.inner.and_then(f) }
    }
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, SET_COOKIE};
    use http_body::Body;

    #[test]
    fn builder_sets_everything() {
        let response = Response::builder()
            .status(202)
            .header(CONTENT_TYPE, "text/plain")
            .header(SET_COOKIE, "a=1")
            .header(SET_COOKIE, "b=2")
            .body("accepted")
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.status_text(), "Accepted");
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(response.headers().get_set_cookie(), vec!["a=1", "b=2"]);
        assert_eq!(response.body().size_hint().exact(), Some(8));
    }

    #[test]
    fn builder_keeps_first_error() {
        let result = Response::builder().status(1000).header("x-ok", "1").body(());
        assert!(result.is_err());

        let result = Response::builder().header("bad header", "1").body(());
        assert!(result.is_err());
    }

    #[test]
    fn custom_status_text() {
        let response = Response::builder().status(StatusCode::IM_A_TEAPOT).status_text("Short And Stout").body(()).unwrap();
        assert_eq!(response.status_text(), "Short And Stout");
        assert!(response.validate().is_ok());
    }

    #[test]
    fn informational_and_control_characters_are_malformed() {
        assert!(Response::empty(StatusCode::CONTINUE).validate().is_err());

        let response = Response::builder().status_text("bad\r\nX-Injected: 1").body(()).unwrap();
        assert!(response.validate().is_err());
    }
}
