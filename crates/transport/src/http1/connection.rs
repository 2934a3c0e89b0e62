use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::CONNECTION;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::body_channel::body_channel;
use super::request::IncomingMessage;
use super::response::{ResponseCommand, ServerResponse};
use crate::body::{IncomingBody, SharedBody};
use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::event::{RequestEvent, ServerEvent};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead, ResponseHead, SendError, TransportError};
use crate::server::Server;
use crate::socket::Socket;

type ResponseMessage = Message<(ResponseHead, PayloadSize), Bytes>;

/// An HTTP/1.x connection, serving one exchange at a time.
///
/// For every request the connection emits a [`RequestEvent::Http1`] and then works for the
/// handles it gave out: it feeds body chunks to the request side as they are asked for and
/// writes whatever the response side sends. Any part of the body nobody read is drained
/// before the next request is decoded.
pub(crate) struct Http1Connection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    server: Server,
    socket: Arc<Socket>,
}

/// How an exchange left the connection.
enum Outcome {
    /// Ready for the next request, which may already have been read.
    KeepAlive(Option<(RequestHead, PayloadSize)>),
    Close,
}

/// Result of executing one response command.
enum Written {
    More,
    Finished,
    Failed,
}

/// Why the first phase of an exchange ended.
enum BodyPhase {
    /// The response finished while the body was still being read.
    ResponseFinished,
    /// The body is complete and the response is still pending.
    BodyDone(Result<(), ParseError>),
    /// Every response handle was dropped before the response ended.
    Abandoned,
    Failed,
}

impl<R, W> Http1Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(reader: R, writer: W, server: Server, socket: Arc<Socket>) -> Self {
        let config = server.config();
        let decoder = RequestDecoder::new(config.max_headers, config.max_header_bytes);
        Self {
            framed_read: FramedRead::with_capacity(reader, decoder, 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            server,
            socket,
        }
    }

    pub(crate) async fn process(mut self) -> Result<(), TransportError> {
        let mut pipelined = None;
        loop {
            let (head, payload_size) = match pipelined.take() {
                Some(next) => next,
                None => match self.next_head().await? {
                    Some(next) => next,
                    None => return Ok(()),
                },
            };

            match self.exchange(head, payload_size).await? {
                Outcome::KeepAlive(next) => pipelined = next,
                Outcome::Close => {
                    if let Err(e) = self.framed_write.get_mut().shutdown().await {
                        debug!(cause = %e, "failed to shutdown connection");
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn next_head(&mut self) -> Result<Option<(RequestHead, PayloadSize)>, TransportError> {
        let next = tokio::select! {
            biased;
            _ = self.server.shutdown_token().cancelled() => {
                info!(remote = %self.socket.remote_addr(), "server shutting down, close idle connection");
                return Ok(None);
            }
            next = self.framed_read.next() => next,
        };

        match next {
            Some(Ok(Message::Header(head))) => Ok(Some(head)),

            Some(Ok(Message::Payload(_))) => {
                error!("error status because chunked has read in do_process");
                self.send_error(StatusCode::BAD_REQUEST).await;
                Err(ParseError::invalid_body("need header while receive body").into())
            }

            Some(Err(e)) if e.is_disconnect() => {
                debug!(cause = %e, "peer went away in the middle of a request head");
                Ok(None)
            }

            Some(Err(e)) => {
                error!("can't receive next request, cause {}", e);
                self.send_error(StatusCode::BAD_REQUEST).await;
                Err(e.into())
            }

            None => {
                info!("cant read more request, break this connection down");
                Ok(None)
            }
        }
    }

    async fn exchange(&mut self, head: RequestHead, payload_size: PayloadSize) -> Result<Outcome, TransportError> {
        let mut close = !head.keep_alive();
        self.framed_write.encoder_mut().set_head_request(*head.method() == Method::HEAD);

        if expects_continue(&head) && !payload_size.is_empty() {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            info!("receive expect request header, sent continue response");
        }

        let aborted = CancellationToken::new();
        let (commands_tx, mut commands) = mpsc::channel(8);
        let response = ServerResponse::new(commands_tx, Arc::clone(&self.socket));

        let (mut body_sender, body_receiver) = body_channel(&mut self.framed_read, payload_size);
        let body = SharedBody::new(IncomingBody::http1(body_receiver));
        let request = IncomingMessage::new(head, Arc::clone(&self.socket), body, aborted.clone());

        self.server.emit(ServerEvent::Request(RequestEvent::Http1 { request, response }))?;

        // serve body reads and response writes side by side until one of them is done
        let phase = {
            let body_future = body_sender.start();
            tokio::pin!(body_future);

            loop {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(command) => match execute(&mut self.framed_write, command, &mut close).await {
                            Written::More => {}
                            Written::Finished => break BodyPhase::ResponseFinished,
                            Written::Failed => break BodyPhase::Failed,
                        },
                        None => break BodyPhase::Abandoned,
                    },
                    result = &mut body_future => break BodyPhase::BodyDone(result),
                }
            }
        };

        let body_result = match phase {
            BodyPhase::ResponseFinished => {
                return match body_sender.skip_data().await {
                    Ok(()) => Ok(self.finish(close, None)),
                    Err(e) => {
                        debug!(cause = %e, "failed to drain request body, close connection");
                        Ok(Outcome::Close)
                    }
                };
            }
            BodyPhase::Abandoned => {
                warn!(remote = %self.socket.remote_addr(), "response dropped before it was finished, close connection");
                return Ok(Outcome::Close);
            }
            BodyPhase::Failed => return Ok(Outcome::Close),
            BodyPhase::BodyDone(result) => result,
        };

        let mut reading = match body_result {
            Ok(()) => true,
            Err(e) if e.is_disconnect() => {
                info!(remote = %self.socket.remote_addr(), "peer closed connection before the response was sent");
                aborted.cancel();
                return Ok(Outcome::Close);
            }
            Err(_) => {
                close = true;
                false
            }
        };

        // the body is done, keep watching the socket while the response is pending so a
        // disconnect is noticed and pipelined requests are kept for later
        let mut pipelined = None;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => match execute(&mut self.framed_write, command, &mut close).await {
                        Written::More => {}
                        Written::Finished => return Ok(self.finish(close, pipelined)),
                        Written::Failed => return Ok(Outcome::Close),
                    },
                    None => {
                        warn!(remote = %self.socket.remote_addr(), "response dropped before it was finished, close connection");
                        return Ok(Outcome::Close);
                    }
                },
                next = self.framed_read.next(), if reading && pipelined.is_none() => match next {
                    Some(Ok(Message::Header(next))) => pipelined = Some(next),
                    None => {
                        info!(remote = %self.socket.remote_addr(), "peer closed connection before the response was sent");
                        aborted.cancel();
                        return Ok(Outcome::Close);
                    }
                    Some(Err(e)) if e.is_disconnect() => {
                        aborted.cancel();
                        return Ok(Outcome::Close);
                    }
                    Some(_) => {
                        reading = false;
                        close = true;
                    }
                },
            }
        }
    }

    fn finish(&self, close: bool, pipelined: Option<(RequestHead, PayloadSize)>) -> Outcome {
        if close || self.server.is_shutdown() { Outcome::Close } else { Outcome::KeepAlive(pipelined) }
    }

    async fn send_error(&mut self, status: StatusCode) {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        let head = ResponseHead::new(status, status.canonical_reason().unwrap_or_default(), headers);

        if let Err(e) = self.framed_write.send(ResponseMessage::Header((head, PayloadSize::Empty))).await {
            debug!(cause = %e, "failed to send error response");
        }
    }
}

async fn execute<W>(framed_write: &mut FramedWrite<W, ResponseEncoder>, command: ResponseCommand, close: &mut bool) -> Written
where
    W: AsyncWrite + Unpin,
{
    let (result, ack, finished) = match command {
        ResponseCommand::WriteHead { head, payload_size, ack } => {
            *close |= head.wants_close();
            let message = ResponseMessage::Header((head, payload_size));
            // flush right away only when no body follows
            let result = if payload_size.is_empty() { framed_write.send(message).await } else { framed_write.feed(message).await };
            (result, ack, false)
        }
        ResponseCommand::Write { data, ack } => {
            let result = framed_write.send(ResponseMessage::Payload(PayloadItem::Chunk(data))).await;
            (result, ack, false)
        }
        ResponseCommand::End { ack } => {
            let result = framed_write.send(ResponseMessage::Payload(PayloadItem::Eof)).await;
            (result, ack, true)
        }
    };

    let written = match (&result, finished) {
        (Err(e), _) => {
            warn!(cause = %e, "failed to write response");
            Written::Failed
        }
        (Ok(()), true) => Written::Finished,
        (Ok(()), false) => Written::More,
    };
    let _ = ack.send(result);
    written
}

fn expects_continue(head: &RequestHead) -> bool {
    head.headers().first("expect").is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::protocol::BoxError;
    use crate::socket::ConnectInfo;
    use http_body_util::BodyExt;
    use tokio::io::AsyncReadExt;

    fn info() -> ConnectInfo {
        ConnectInfo::new("127.0.0.1:40000".parse().unwrap())
    }

    fn echo_server() -> Server {
        let server = Server::new();
        server.add_listener(
            EventKind::Request,
            Arc::new(|event: &ServerEvent| -> Result<(), BoxError> {
                if let ServerEvent::Request(RequestEvent::Http1 { request, response }) = event {
                    let request = request.clone();
                    let response = response.clone();
                    tokio::spawn(async move {
                        let body = request.take_body().unwrap().collect().await.unwrap().to_bytes();
                        let text = format!("{} {} {}", request.method(), request.target(), String::from_utf8_lossy(&body));
                        let size = PayloadSize::new_length(text.len() as u64);
                        response.write_head(StatusCode::OK, "OK", HeaderMap::new(), size).await.unwrap();
                        response.write(Bytes::from(text)).await.unwrap();
                        response.end().await.unwrap();
                    });
                }
                Ok(())
            }),
        );
        server
    }

    async fn roundtrip(server: &Server, raw: &[u8]) -> String {
        let (mut client, io) = tokio::io::duplex(4096);
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve_connection(io, info()).await }
        });

        client.write_all(raw).await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        let _ = serving.await.unwrap();
        out
    }

    #[tokio::test]
    async fn serves_pipelined_requests_in_order() {
        let server = echo_server();
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\nConnection: close\r\n\r\n";

        let out = roundtrip(&server, raw).await;

        let first = out.find("POST /a hello").unwrap();
        let second = out.find("GET /b ").unwrap();
        assert!(first < second);
        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert_eq!(server.connection_count(), 1);
    }

    #[tokio::test]
    async fn chunked_request_body_is_decoded() {
        let server = echo_server();
        let raw = b"PUT /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";

        let out = roundtrip(&server, raw).await;
        assert!(out.ends_with("PUT /c hello world"));
    }

    #[tokio::test]
    async fn dropped_response_closes_connection() {
        let server = Server::new();
        server.add_listener(EventKind::Request, Arc::new(|_: &ServerEvent| -> Result<(), BoxError> { Ok(()) }));

        let out = roundtrip(&server, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn malformed_request_gets_bad_request() {
        let server = echo_server();
        let out = roundtrip(&server, b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn hang_up_with_unread_body_aborts_request() {
        let server = Server::new();
        let (tokens, mut received) = mpsc::unbounded_channel();
        server.add_listener(
            EventKind::Request,
            Arc::new(move |event: &ServerEvent| -> Result<(), BoxError> {
                if let ServerEvent::Request(RequestEvent::Http1 { request, response }) = event {
                    let _ = tokens.send((request.aborted().clone(), response.clone()));
                }
                Ok(())
            }),
        );

        let (mut client, io) = tokio::io::duplex(4096);
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve_connection(io, info()).await }
        });

        client.write_all(b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello").await.unwrap();
        let (aborted, _response) = received.recv().await.unwrap();
        drop(client);

        let fired = tokio::time::timeout(std::time::Duration::from_millis(500), aborted.cancelled()).await;
        assert!(fired.is_ok());
        let _ = serving.await.unwrap();
    }

    #[tokio::test]
    async fn failing_listener_closes_connection() {
        let server = Server::new();
        server.add_listener(EventKind::Request, Arc::new(|_: &ServerEvent| -> Result<(), BoxError> { Err("boom".into()) }));

        let out = roundtrip(&server, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(out.is_empty());
    }
}
