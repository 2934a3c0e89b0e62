//! Response head encoding for HTTP/1.x.
//!
//! The status line always carries the caller's reason phrase. Framing headers are
//! rewritten from the [`PayloadSize`] so they always agree with the body that follows,
//! and left out entirely for statuses that never have a body.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, header};
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadSize, ResponseHead, SendError};

/// Initial buffer size allocated for head serialization
const INIT_HEAD_SIZE: usize = 4 * 1024;

const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");

#[derive(Debug, Clone, Copy, Default)]
pub struct HeadEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        dst.reserve(INIT_HEAD_SIZE);
        write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", head.status().as_str(), head.reason())?;

        let forbids_body = head.forbids_body();
        let headers = head.headers_mut();
        match payload_size {
            _ if forbids_body => {
                headers.remove(header::CONTENT_LENGTH);
                headers.remove(header::TRANSFER_ENCODING);
            }
            PayloadSize::Length(n) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(header::TRANSFER_ENCODING, CHUNKED);
            }
            PayloadSize::Empty => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }

        for (name, value) in head.headers().iter() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
