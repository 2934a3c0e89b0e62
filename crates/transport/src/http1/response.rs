use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{PayloadSize, ResponseHead, SendError};
use crate::socket::Socket;

pub(crate) type Ack = oneshot::Sender<Result<(), SendError>>;

#[derive(Debug)]
pub(crate) enum ResponseCommand {
    WriteHead { head: ResponseHead, payload_size: PayloadSize, ack: Ack },
    Write { data: Bytes, ack: Ack },
    End { ack: Ack },
}

#[derive(Debug, Default)]
struct ResponseState {
    headers_sent: AtomicBool,
    finished: AtomicBool,
}

/// The response half of an HTTP/1.x exchange.
///
/// Every operation is executed by the connection task and resolves once the bytes are
/// handed to the socket, which paces a writer to the speed of the peer. Clones share the
/// same state, so the head can be written at most once across all of them.
#[derive(Debug, Clone)]
pub struct ServerResponse {
    commands: mpsc::Sender<ResponseCommand>,
    state: Arc<ResponseState>,
    socket: Arc<Socket>,
}

impl ServerResponse {
    pub(crate) fn new(commands: mpsc::Sender<ResponseCommand>, socket: Arc<Socket>) -> Self {
        Self { commands, state: Arc::default(), socket }
    }

    pub fn headers_sent(&self) -> bool {
        self.state.headers_sent.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    /// True once nothing more can be written: the response ended or the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.is_finished() || self.commands.is_closed() || self.socket.is_closed()
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    /// Writes the status line and headers.
    ///
    /// `payload_size` picks the framing: `content-length` for a known size, chunked otherwise.
    /// Framing headers already present in `headers` are replaced.
    pub async fn write_head(
        &self,
        status: StatusCode,
        reason: impl Into<Cow<'static, str>>,
        headers: HeaderMap,
        payload_size: PayloadSize,
    ) -> Result<(), SendError> {
        if self.state.headers_sent.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(SendError::HeadersAlreadySent);
        }

        let head = ResponseHead::new(status, reason, headers);
        self.command(|ack| ResponseCommand::WriteHead { head, payload_size, ack }).await
    }

    pub async fn write(&self, data: Bytes) -> Result<(), SendError> {
        if !self.headers_sent() {
            return Err(SendError::HeadersNotSent);
        }
        if self.is_finished() {
            return Err(SendError::Closed);
        }
        self.command(|ack| ResponseCommand::Write { data, ack }).await
    }

    /// Finishes the response, writing an empty `200 OK` first if no head was written.
    ///
    /// Ending a response that is already closed does nothing.
    pub async fn end(&self) -> Result<(), SendError> {
        if self.is_closed() {
            return Ok(());
        }
        if !self.headers_sent() {
            self.write_head(StatusCode::OK, "OK", HeaderMap::new(), PayloadSize::Empty).await?;
        }
        if self.state.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.command(|ack| ResponseCommand::End { ack }).await
    }

    async fn command(&self, command: impl FnOnce(Ack) -> ResponseCommand) -> Result<(), SendError> {
        let (ack, result) = oneshot::channel();
        self.commands.send(command(ack)).await.map_err(|_| SendError::Closed)?;
        result.await.map_err(|_| SendError::Closed)?
    }
}
