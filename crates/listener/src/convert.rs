//! Rebuilds a [`Request`] from the raw fields a transport event carries.

use http::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::body::RequestBody;
use crate::error::BuildError;
use crate::headers::Headers;
use crate::request::{AbortSignal, Request};

const FALLBACK_AUTHORITY: &str = "localhost";

/// Where the method, scheme, authority and path of a request come from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RawRequest<'a> {
    /// The request line of an HTTP/1.x message, the authority comes from `host`.
    Http1 { method: &'a Method, target: &'a str, encrypted: bool },
    /// An HTTP/2 stream: everything comes from the normalized pseudo-headers.
    Http2,
}

/// Builds the request. The body is dropped for `GET` and `HEAD`, the abort signal is a fresh
/// child of `aborted`.
pub(crate) fn build_request(
    raw: RawRequest<'_>,
    headers: Headers,
    body: Option<RequestBody>,
    aborted: &CancellationToken,
) -> Result<Request, BuildError> {
    let (method, scheme, authority, path) = match raw {
        RawRequest::Http1 { method, target, encrypted } => {
            let scheme = if encrypted { "https" } else { "http" };
            (method.clone(), scheme.to_string(), headers.get("host"), target.to_string())
        }
        RawRequest::Http2 => {
            let method = headers.get("method").ok_or_else(|| BuildError::malformed("stream without :method"))?;
            let method = Method::from_bytes(method.as_bytes()).map_err(|_| BuildError::malformed(format!("invalid method {method:?}")))?;
            let scheme = headers.get("scheme").ok_or_else(|| BuildError::malformed("stream without :scheme"))?;
            let path = headers.get("path").ok_or_else(|| BuildError::malformed("stream without :path"))?;
            (method, scheme, headers.get("authority").or_else(|| headers.get("host")), path)
        }
    };

    let authority = authority.unwrap_or_else(|| FALLBACK_AUTHORITY.to_string());
    let base = Url::parse(&format!("{scheme}://{authority}"))
        .map_err(|e| BuildError::malformed(format!("invalid origin {scheme}://{authority}: {e}")))?;
    let url = base.join(sanitize_path(&path)).map_err(|e| BuildError::malformed(format!("invalid path {path:?}: {e}")))?;

    let body = if method == Method::GET || method == Method::HEAD { None } else { body };
    Ok(Request::from_parts(method, url, headers, body, AbortSignal::child_of(aborted)))
}

/// Paths that are fine on the wire but not as a relative URL.
fn sanitize_path(path: &str) -> &str {
    if path == "//" { "/" } else { path }
}
