use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Frames response payload items according to the [`PayloadSize`] announced in the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoder {
    Length { remaining: u64 },
    Chunked { eof: bool },
    NoBody,
    /// Body bytes are dropped, as for responses to `HEAD` and statuses that forbid a body.
    Discard,
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => PayloadEncoder::Length { remaining: length },
            PayloadSize::Chunked => PayloadEncoder::Chunked { eof: false },
            PayloadSize::Empty => PayloadEncoder::NoBody,
        }
    }
}

impl PayloadEncoder {
    pub fn is_finish(&self) -> bool {
        match self {
            PayloadEncoder::Length { remaining } => *remaining == 0,
            PayloadEncoder::Chunked { eof } => *eof,
            PayloadEncoder::NoBody | PayloadEncoder::Discard => true,
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (self, item) {
            (PayloadEncoder::Length { remaining }, PayloadItem::Chunk(bytes)) => {
                let size = bytes.remaining() as u64;
                if size > *remaining {
                    warn!(size, remaining = *remaining, "body exceeds the announced content-length");
                    return Err(SendError::invalid_body("body exceeds the announced content-length"));
                }
                dst.extend_from_slice(bytes.chunk());
                *remaining -= size;
                Ok(())
            }
            (PayloadEncoder::Length { remaining }, PayloadItem::Eof) => {
                if *remaining > 0 {
                    return Err(SendError::invalid_body(format!("body ended {remaining} bytes short of the announced content-length")));
                }
                Ok(())
            }
            (PayloadEncoder::Chunked { eof: true }, _) => Ok(()),
            (PayloadEncoder::Chunked { .. }, PayloadItem::Chunk(bytes)) => {
                if !bytes.has_remaining() {
                    // a zero sized chunk would end the body
                    return Ok(());
                }
                write!(Writer(dst), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                dst.extend_from_slice(bytes.chunk());
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            (PayloadEncoder::Chunked { eof }, PayloadItem::Eof) => {
                *eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
            (PayloadEncoder::NoBody, PayloadItem::Chunk(bytes)) if bytes.has_remaining() => {
                Err(SendError::invalid_body("response announced no body"))
            }
            (PayloadEncoder::NoBody | PayloadEncoder::Discard, _) => Ok(()),
        }
    }
}

struct Writer<'a>(&'a mut BytesMut);

impl std::io::Write for Writer<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
