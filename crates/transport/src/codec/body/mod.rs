//! Payload framing for HTTP/1.x message bodies.

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
