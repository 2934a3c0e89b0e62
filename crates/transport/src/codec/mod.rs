//! HTTP/1.x wire codec.
//!
//! - [`RequestDecoder`]: turns bytes into a request head followed by payload items
//! - [`ResponseEncoder`]: turns a response head and payload items into bytes
//!
//! Both plug into `tokio_util::codec::{FramedRead, FramedWrite}`. The head codec lives in
//! `header`, content-length and chunked framing in `body`.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;

pub use header::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS};
