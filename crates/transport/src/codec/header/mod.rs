mod head_decoder;
mod head_encoder;

pub use head_decoder::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS, HeadDecoder};
pub use head_encoder::HeadEncoder;
