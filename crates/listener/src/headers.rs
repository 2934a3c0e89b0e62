//! The canonical header multimap and the normalizer that builds it from raw transport headers.
//!
//! Raw headers arrive grouped per lowercase name, HTTP/2 pseudo-headers included. The
//! normalizer strips the pseudo-header prefix and applies the duplicate rules:
//!
//! - a name in the discard set keeps its first value, later ones are dropped
//! - `cookie` keeps every value, [`Headers::get`] joins them with `; `
//! - `set-cookie` keeps every value as its own entry, see [`Headers::get_set_cookie`]
//! - every other name keeps its values in arrival order

use std::collections::HashSet;

use http::header::{self, HeaderName, HeaderValue, IntoHeaderName};
use http::HeaderMap;
use micro_transport::protocol::{PSEUDO_HEADER_PREFIX, RawHeaders};
use once_cell::sync::Lazy;
use tracing::trace;

static DISCARD_DUPLICATES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "age",
        "content-length",
        "content-type",
        "etag",
        "expires",
        "from",
        "host",
        "if-modified-since",
        "if-unmodified-since",
        "last-modified",
        "location",
        "max-forwards",
        "proxy-authorization",
        "referer",
        "retry-after",
        "server",
        "user-agent",
        // names that only show up stripped from pseudo-headers
        "status",
        "method",
        "authority",
        "scheme",
        "path",
        "protocol",
        "access-control-allow-credentials",
        "access-control-max-age",
        "access-control-request-method",
        "content-encoding",
        "content-language",
        "content-location",
        "content-md5",
        "content-range",
        "date",
        "dnt",
        "if-match",
        "if-none-match",
        "if-range",
        "range",
        "tk",
        "upgrade-insecure-requests",
        "x-content-type-options",
    ]
    .into_iter()
    .collect()
});

/// Whether only the first occurrence of the lowercase header `name` is kept.
pub fn discards_duplicates(name: &str) -> bool {
    DISCARD_DUPLICATES.contains(name)
}

/// Case-insensitive header multimap shared by requests and responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: HeaderMap,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the canonical headers from a raw header block.
    pub fn normalize(raw: &RawHeaders) -> Self {
        let mut map = HeaderMap::with_capacity(raw.len());

        for field in raw {
            let clean = field.name().strip_prefix(PSEUDO_HEADER_PREFIX).unwrap_or(field.name());
            let Ok(name) = HeaderName::from_bytes(clean.as_bytes()) else {
                trace!(name = field.name(), "skip header with invalid name");
                continue;
            };

            if discards_duplicates(name.as_str()) {
                if !map.contains_key(&name)
                    && let Some(first) = field.values().first()
                {
                    map.insert(name, first.clone());
                }
                continue;
            }

            for value in field.values() {
                map.append(name.clone(), value.clone());
            }
        }

        Self { map }
    }

    /// All values of `name` joined into one string: `; ` for `cookie`, `, ` otherwise.
    pub fn get(&self, name: &str) -> Option<String> {
        let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
        let mut values = self.map.get_all(&name).iter().peekable();
        values.peek()?;

        let separator = if name == header::COOKIE { "; " } else { ", " };
        let joined = values.map(|value| String::from_utf8_lossy(value.as_bytes())).collect::<Vec<_>>().join(separator);
        Some(joined)
    }

    pub fn first(&self, name: &str) -> Option<&HeaderValue> {
        self.map.get(name)
    }

    pub fn get_all(&self, name: &str) -> Vec<&HeaderValue> {
        self.map.get_all(name).iter().collect()
    }

    /// Every `set-cookie` value, one per cookie.
    pub fn get_set_cookie(&self) -> Vec<&str> {
        self.map.get_all(header::SET_COOKIE).iter().filter_map(|value| value.to_str().ok()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn append<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.map.append(name, value);
    }

    /// Replaces every value of `name`.
    pub fn insert<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.map.insert(name, value);
    }

    /// Removes every value of `name`, returning whether there was one.
    pub fn remove(&mut self, name: &str) -> bool {
        match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => self.map.remove(&name).is_some(),
            Err(_) => false,
        }
    }

    /// Number of values, counting each value of a multi-valued name.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> header::Iter<'_, HeaderValue> {
        self.map.iter()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    pub fn into_map(self) -> HeaderMap {
        self.map
    }
}

impl From<HeaderMap> for Headers {
    fn from(map: HeaderMap) -> Self {
        Self { map }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a HeaderName, &'a HeaderValue);
    type IntoIter = header::Iter<'a, HeaderValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}
