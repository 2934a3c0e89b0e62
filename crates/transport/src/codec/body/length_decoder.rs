//! Content-length framed payloads.

use std::cmp;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

/// Hands out at most `length` bytes, then reports EOF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = cmp::min(self.remaining, src.len() as u64);
        let bytes = src.split_to(len as usize).freeze();

        self.remaining -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_declared_length() {
        let mut buffer = BytesMut::from(&b"hello worldGET / HTTP/1.1\r\n"[..]);
        let mut decoder = LengthDecoder::new(11);

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(item.as_bytes().unwrap().as_ref(), b"hello world");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(&buffer[..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn waits_for_more_bytes() {
        let mut buffer = BytesMut::from(&b"hel"[..]);
        let mut decoder = LengthDecoder::new(5);

        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().as_bytes().unwrap().as_ref(), b"hel");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo");
        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().as_bytes().unwrap().as_ref(), b"lo");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
