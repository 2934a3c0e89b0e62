use std::io;
use std::io::ErrorKind;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use super::body::PayloadEncoder;
use super::header::HeadEncoder;
use crate::protocol::{Message, PayloadSize, ResponseHead, SendError};

/// HTTP/1.x response encoder: one head, then payload items up to EOF.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    head_encoder: HeadEncoder,
    payload_encoder: Option<PayloadEncoder>,
    head_request: bool,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Responses to `HEAD` keep their framing headers but never carry body bytes.
    pub fn set_head_request(&mut self, head_request: bool) {
        self.head_request = head_request;
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                let discard = self.head_request || head.forbids_body();
                self.payload_encoder = Some(if discard { PayloadEncoder::Discard } else { payload_size.into() });
                self.head_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response head but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                let is_eof = payload_item.is_eof();
                let result = payload_encoder.encode(payload_item, dst);
                if is_eof {
                    self.payload_encoder = None;
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use crate::protocol::PayloadItem;

    #[test]
    fn encodes_head_then_body() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let head = ResponseHead::new(StatusCode::OK, "OK", HeaderMap::new());
        encoder.encode(Message::<_, Bytes>::Header((head, PayloadSize::Length(2))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize), _>::Payload(PayloadItem::Chunk(Bytes::from_static(b"ok"))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok");
    }

    #[test]
    fn head_request_keeps_length_without_body() {
        let mut encoder = ResponseEncoder::new();
        encoder.set_head_request(true);
        let mut dst = BytesMut::new();

        let head = ResponseHead::new(StatusCode::OK, "OK", HeaderMap::new());
        encoder.encode(Message::<_, Bytes>::Header((head, PayloadSize::Length(2))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize), _>::Payload(PayloadItem::Chunk(Bytes::from_static(b"ok"))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n");
    }

    #[test]
    fn no_content_drops_body_bytes() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let head = ResponseHead::new(StatusCode::NO_CONTENT, "No Content", HeaderMap::new());
        encoder.encode(Message::<_, Bytes>::Header((head, PayloadSize::Length(4))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize), _>::Payload(PayloadItem::Chunk(Bytes::from_static(b"oops"))), &mut dst).unwrap();
        encoder.encode(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 204 No Content\r\n\r\n");

        // the next response on the connection is framed normally again
        let mut dst = BytesMut::new();
        let head = ResponseHead::new(StatusCode::OK, "OK", HeaderMap::new());
        encoder.encode(Message::<_, Bytes>::Header((head, PayloadSize::Empty)), &mut dst).unwrap();
        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    fn payload_before_head_is_rejected() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let result = encoder.encode(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof), &mut dst);
        assert!(result.is_err());
    }
}
