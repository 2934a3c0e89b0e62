//! HTTP/1.x request decoder.
//!
//! Works in two phases per request: the head is decoded by [`HeadDecoder`], then the payload
//! by a [`PayloadDecoder`] chosen from the head, until it reports EOF. After that the decoder
//! is ready for the next (possibly pipelined) request on the same connection.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::body::PayloadDecoder;
use super::header::HeadDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};

#[derive(Debug)]
pub struct RequestDecoder {
    head_decoder: HeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new(max_headers: usize, max_header_bytes: usize) -> Self {
        Self { head_decoder: HeadDecoder::new(max_headers, max_header_bytes), payload_decoder: None }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { head_decoder: HeadDecoder::default(), payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload_decoder = None;
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        let message = match self.head_decoder.decode(src)? {
            Some((head, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((head, payload_size)))
            }
            None => None,
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn decodes_pipelined_requests() {
        let str = indoc! {r##"
        POST /submit HTTP/1.1
        Host: localhost
        Content-Length: 11

        hello worldGET /next HTTP/1.1
        Host: localhost

        "##};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::default();

        let Some(Message::Header((head, size))) = decoder.decode(&mut buf).unwrap() else { panic!("expected head") };
        assert_eq!(head.target(), "/submit");
        assert_eq!(size, PayloadSize::Length(11));

        let Some(Message::Payload(PayloadItem::Chunk(bytes))) = decoder.decode(&mut buf).unwrap() else { panic!("expected chunk") };
        assert_eq!(&bytes[..], b"hello world");

        let Some(Message::Payload(PayloadItem::Eof)) = decoder.decode(&mut buf).unwrap() else { panic!("expected eof") };

        let Some(Message::Header((head, size))) = decoder.decode(&mut buf).unwrap() else { panic!("expected second head") };
        assert_eq!(head.target(), "/next");
        assert!(size.is_empty());

        let Some(Message::Payload(PayloadItem::Eof)) = decoder.decode(&mut buf).unwrap() else { panic!("expected empty body") };
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
