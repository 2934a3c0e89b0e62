//! HTTP/2 on top of the `h2` crate.
//!
//! One task accepts streams for the whole connection; each stream gets a driver task that
//! owns its send side (see [`ServerStream`]).

mod connection;
mod stream;

pub(crate) use connection::serve;
pub use stream::{Http2ServerRequest, ServerStream};
