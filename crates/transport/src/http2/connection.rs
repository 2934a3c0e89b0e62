use std::sync::Arc;

use bytes::Bytes;
use h2::server::{Builder, SendResponse};
use h2::{Reason, RecvStream};
use http::{HeaderValue, Request};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::stream::{Http2ServerRequest, ServerStream, drive};
use crate::body::{IncomingBody, SharedBody};
use crate::event::{RequestEvent, ServerEvent, StreamEvent};
use crate::protocol::{RawHeaders, TransportError};
use crate::server::Server;
use crate::socket::Socket;

pub(crate) async fn serve<IO>(server: &Server, io: IO, socket: &Arc<Socket>) -> Result<(), TransportError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = server.config();
    let mut builder = Builder::new();
    builder.max_concurrent_streams(config.max_concurrent_streams).initial_window_size(config.initial_window_size);

    let mut connection = builder.handshake::<_, Bytes>(io).await?;
    debug!(remote = %socket.remote_addr(), "http2 handshake complete");

    // parent of every stream's abort token on this connection
    let connection_aborted = CancellationToken::new();
    let mut going_away = false;

    let result = loop {
        let accepted = tokio::select! {
            accepted = connection.accept() => accepted,
            _ = server.shutdown_token().cancelled(), if !going_away => {
                info!(remote = %socket.remote_addr(), "server shutting down, send GOAWAY");
                connection.graceful_shutdown();
                going_away = true;
                continue;
            }
        };

        match accepted {
            Some(Ok((request, respond))) => on_stream(server, socket, &connection_aborted, request, respond),
            Some(Err(e)) => break Err(TransportError::from(e)),
            None => break Ok(()),
        }
    };

    if result.is_err() {
        connection_aborted.cancel();
    }
    result
}

fn on_stream(server: &Server, socket: &Arc<Socket>, connection_aborted: &CancellationToken, request: Request<RecvStream>, respond: SendResponse<Bytes>) {
    let (parts, body) = request.into_parts();
    let headers = raw_headers(&parts);

    let (commands, receiver) = mpsc::channel(8);
    let aborted = connection_aborted.child_token();
    let stream_id = respond.stream_id().as_u32();
    let stream = ServerStream::new(stream_id, commands, Arc::clone(socket), SharedBody::new(IncomingBody::http2(body)), aborted.clone());

    server.spawn(drive(respond, receiver, aborted));

    let event = ServerEvent::Stream(StreamEvent { stream: stream.clone(), headers: headers.clone() });
    if server.emit(event).is_err() {
        error!(stream_id, "stream listener failed, reset stream");
        stream.reset(Reason::INTERNAL_ERROR);
        return;
    }

    let event = ServerEvent::Request(RequestEvent::Http2(Http2ServerRequest::new(stream.clone(), headers)));
    if server.emit(event).is_err() {
        error!(stream_id, "request listener failed, reset stream");
        stream.reset(Reason::INTERNAL_ERROR);
    }
}

/// Pseudo-headers first, in request order, then the regular fields.
fn raw_headers(parts: &http::request::Parts) -> RawHeaders {
    let mut headers = RawHeaders::new();

    if let Ok(method) = HeaderValue::from_str(parts.method.as_str()) {
        headers.append(":method", method);
    }
    if let Some(scheme) = parts.uri.scheme_str().and_then(|s| HeaderValue::from_str(s).ok()) {
        headers.append(":scheme", scheme);
    }
    if let Some(authority) = parts.uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()) {
        headers.append(":authority", authority);
    }
    if let Some(path) = parts.uri.path_and_query().and_then(|p| HeaderValue::from_str(p.as_str()).ok()) {
        headers.append(":path", path);
    }

    headers.extend_from_map(&parts.headers);
    headers
}
