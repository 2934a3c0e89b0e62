//! Per-connection entry point: protocol detection and dispatch.
//!
//! A client speaking HTTP/2 with prior knowledge opens with the connection preface, an
//! HTTP/1.x client never does. The first bytes are read, compared with the preface and
//! replayed to whichever protocol handles the connection.

mod rewind;

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info};

use crate::http1::Http1Connection;
use crate::http2;
use crate::protocol::TransportError;
use crate::server::Server;
use crate::socket::{ConnectInfo, Socket};
use rewind::Rewind;

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Http1,
    Http2,
}

pub(crate) async fn serve<IO>(server: Server, io: IO, info: ConnectInfo) -> Result<(), TransportError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let socket = Arc::new(Socket::new(info));
    let result = dispatch(&server, io, &socket).await;
    socket.mark_closed();
    result
}

async fn dispatch<IO>(server: &Server, mut io: IO, socket: &Arc<Socket>) -> Result<(), TransportError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = server.config();
    let mut prefix = BytesMut::with_capacity(PREFACE.len());

    let protocol = match (config.allow_http1, config.allow_http2) {
        (true, false) => Protocol::Http1,
        (false, true) => Protocol::Http2,
        (false, false) => {
            info!(remote = %socket.remote_addr(), "no protocol enabled, close connection");
            return Ok(());
        }
        (true, true) => {
            while prefix.len() < PREFACE.len() && PREFACE.starts_with(&prefix) {
                if io.read_buf(&mut prefix).await? == 0 {
                    break;
                }
            }
            if prefix.is_empty() {
                debug!(remote = %socket.remote_addr(), "connection closed before sending anything");
                return Ok(());
            }
            if prefix.starts_with(PREFACE) { Protocol::Http2 } else { Protocol::Http1 }
        }
    };

    debug!(remote = %socket.remote_addr(), ?protocol, "serving connection");
    let io = Rewind::new(io, prefix.freeze());
    match protocol {
        Protocol::Http1 => {
            let (reader, writer) = tokio::io::split(io);
            Http1Connection::new(reader, writer, server.clone(), Arc::clone(socket)).process().await
        }
        Protocol::Http2 => http2::serve(server, io, socket).await,
    }
}

