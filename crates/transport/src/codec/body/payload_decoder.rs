use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::chunked_decoder::ChunkedDecoder;
use super::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Dispatches to the decoder matching the request's framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    NoBody,
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => PayloadDecoder::Length(LengthDecoder::new(length)),
            PayloadSize::Chunked => PayloadDecoder::Chunked(ChunkedDecoder::new()),
            PayloadSize::Empty => PayloadDecoder::NoBody,
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            PayloadDecoder::Length(decoder) => decoder.decode(src),
            PayloadDecoder::Chunked(decoder) => decoder.decode(src),
            PayloadDecoder::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}
