//! Decoder for `transfer-encoding: chunked` payloads.
//!
//! Chunk extensions and trailer fields are read and discarded. Chunk data is handed out
//! as soon as it arrives, so a large chunk never has to be buffered whole.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// First hex digit of a chunk size
    SizeStart,
    /// Further hex digits
    Size,
    /// Whitespace between the size and an extension or CRLF
    SizeWs,
    /// Chunk extension, skipped up to CR
    Extension,
    /// LF ending the size line
    SizeLf,
    /// Chunk data
    Data,
    /// CR after chunk data
    DataCr,
    /// LF after chunk data
    DataLf,
    /// Start of a trailer line, or the final CR
    TrailerStart,
    /// Inside a trailer line, skipped up to LF
    Trailer,
    /// Final LF
    EndLf,
    Done,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::SizeStart, remaining: 0 }
    }

    fn step(&mut self, byte: u8) -> Result<State, ParseError> {
        use State::*;

        let next = match (self.state, byte) {
            (SizeStart, b) => {
                self.remaining = hex_value(b).ok_or_else(|| invalid("chunk size must start with a hex digit"))?;
                Size
            }
            (Size, b';') => Extension,
            (Size, b' ' | b'\t') => SizeWs,
            (Size, b'\r') => SizeLf,
            (Size, b) => {
                let digit = hex_value(b).ok_or_else(|| invalid("invalid chunk size digit"))?;
                self.remaining = self
                    .remaining
                    .checked_mul(16)
                    .and_then(|n| n.checked_add(digit))
                    .ok_or_else(|| invalid("chunk size overflow"))?;
                Size
            }
            (SizeWs, b' ' | b'\t') => SizeWs,
            (SizeWs, b';') => Extension,
            (SizeWs, b'\r') => SizeLf,
            (SizeWs, _) => return Err(invalid("invalid chunk size line")),
            (Extension, b'\r') => SizeLf,
            (Extension, _) => Extension,
            (SizeLf, b'\n') if self.remaining == 0 => TrailerStart,
            (SizeLf, b'\n') => Data,
            (SizeLf, _) => return Err(invalid("expected LF after chunk size")),
            (DataCr, b'\r') => DataLf,
            (DataCr, _) => return Err(invalid("expected CR after chunk data")),
            (DataLf, b'\n') => SizeStart,
            (DataLf, _) => return Err(invalid("expected LF after chunk data")),
            (TrailerStart, b'\r') => EndLf,
            (TrailerStart, _) => Trailer,
            (Trailer, b'\n') => TrailerStart,
            (Trailer, _) => Trailer,
            (EndLf, b'\n') => Done,
            (EndLf, _) => return Err(invalid("expected LF at end of chunked body")),
            (state @ (Data | Done), _) => state,
        };
        Ok(next)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Done => return Ok(Some(PayloadItem::Eof)),

                State::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = self.remaining.min(src.len() as u64) as usize;
                    let bytes = src.split_to(len).freeze();
                    self.remaining -= len as u64;
                    if self.remaining == 0 {
                        self.state = State::DataCr;
                    }
                    trace!(size = len, "decoded chunk data");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                _ => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let byte = src[0];
                    src.advance(1);
                    self.state = self.step(byte)?;
                }
            }
        }
    }
}

fn hex_value(byte: u8) -> Option<u64> {
    (byte as char).to_digit(16).map(u64::from)
}

fn invalid(reason: &str) -> ParseError {
    ParseError::invalid_body(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut ChunkedDecoder, buffer: &mut BytesMut) -> (Vec<u8>, bool) {
        let mut body = Vec::new();
        loop {
            match decoder.decode(buffer).unwrap() {
                Some(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => return (body, true),
                None => return (body, false),
            }
        }
    }

    #[test]
    fn decodes_chunks_and_trailers() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n6;name=value\r\n world\r\n0\r\nExpires: never\r\n\r\nNEXT"[..]);
        let mut decoder = ChunkedDecoder::new();

        let (body, eof) = decode_all(&mut decoder, &mut buffer);
        assert!(eof);
        assert_eq!(body, b"hello world");
        assert_eq!(&buffer[..], b"NEXT");
    }

    #[test]
    fn resumes_across_partial_input() {
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"A\r\n0123"[..]);

        let (body, eof) = decode_all(&mut decoder, &mut buffer);
        assert!(!eof);
        assert_eq!(body, b"0123");

        buffer.extend_from_slice(b"456789\r\n0\r\n");
        let (body, eof) = decode_all(&mut decoder, &mut buffer);
        assert!(!eof);
        assert_eq!(body, b"456789");

        buffer.extend_from_slice(b"\r\n");
        let (_, eof) = decode_all(&mut decoder, &mut buffer);
        assert!(eof);
    }

    #[test]
    fn rejects_bad_size_line() {
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"zz\r\n"[..]);
        assert!(decoder.decode(&mut buffer).is_err());

        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"3\r\nabcX"[..]);
        assert!(decoder.decode(&mut buffer).is_ok());
        assert!(decoder.decode(&mut buffer).is_err());
    }
}
