use std::future::poll_fn;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use h2::server::SendResponse;
use h2::{Reason, SendStream};
use http::Response;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::body::{IncomingBody, SharedBody};
use crate::protocol::{BodyError, RawHeaders, SendError};
use crate::socket::Socket;

type Ack = oneshot::Sender<Result<(), SendError>>;

#[derive(Debug)]
pub(crate) enum StreamCommand {
    Respond { response: Response<()>, end_of_stream: bool, ack: Ack },
    Data { data: Bytes, ack: Ack },
    End { ack: Ack },
    Reset { reason: Reason },
}

#[derive(Debug, Default)]
struct StreamState {
    headers_sent: AtomicBool,
    ended: AtomicBool,
}

/// Handle to one HTTP/2 stream.
///
/// Writes are executed by a driver task that owns the `h2` send side, so a handle can be
/// cloned and moved freely. `write` resolves once the data fit into the peer's flow-control
/// window.
#[derive(Debug, Clone)]
pub struct ServerStream {
    id: u32,
    commands: mpsc::Sender<StreamCommand>,
    state: Arc<StreamState>,
    socket: Arc<Socket>,
    body: SharedBody,
    aborted: CancellationToken,
}

impl ServerStream {
    pub(crate) fn new(id: u32, commands: mpsc::Sender<StreamCommand>, socket: Arc<Socket>, body: SharedBody, aborted: CancellationToken) -> Self {
        Self { id, commands, state: Arc::default(), socket, body, aborted }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub fn headers_sent(&self) -> bool {
        self.state.headers_sent.load(Ordering::Acquire)
    }

    /// True once nothing more can be written: the stream ended, was reset, or the driver is gone.
    pub fn is_closed(&self) -> bool {
        self.state.ended.load(Ordering::Acquire) || self.aborted.is_cancelled() || self.commands.is_closed()
    }

    pub fn body(&self) -> &SharedBody {
        &self.body
    }

    pub fn take_body(&self) -> Result<IncomingBody, BodyError> {
        self.body.claim()
    }

    /// Fires when the peer resets the stream or the connection fails.
    pub fn aborted(&self) -> &CancellationToken {
        &self.aborted
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }

    /// Sends the response head. `:status` is taken from `response.status()`.
    ///
    /// With `end_of_stream` the stream is finished right after the head.
    pub async fn respond(&self, response: Response<()>, end_of_stream: bool) -> Result<(), SendError> {
        if self.state.headers_sent.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(SendError::HeadersAlreadySent);
        }
        if end_of_stream {
            self.state.ended.store(true, Ordering::Release);
        }
        self.command(|ack| StreamCommand::Respond { response, end_of_stream, ack }).await
    }

    pub async fn write(&self, data: Bytes) -> Result<(), SendError> {
        if !self.headers_sent() {
            return Err(SendError::HeadersNotSent);
        }
        if self.state.ended.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.command(|ack| StreamCommand::Data { data, ack }).await
    }

    /// Finishes the stream, responding with an empty `200` first if no head was sent.
    ///
    /// Ending a stream that is already closed does nothing.
    pub async fn end(&self) -> Result<(), SendError> {
        if self.is_closed() {
            return Ok(());
        }
        if !self.headers_sent() {
            return match self.respond(Response::new(()), true).await {
                Err(SendError::HeadersAlreadySent) => self.end_stream().await,
                result => result,
            };
        }
        self.end_stream().await
    }

    async fn end_stream(&self) -> Result<(), SendError> {
        if self.state.ended.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.command(|ack| StreamCommand::End { ack }).await
    }

    /// Resets the stream with `reason`. Nothing more can be sent afterwards.
    pub fn reset(&self, reason: Reason) {
        self.state.ended.store(true, Ordering::Release);
        if self.commands.try_send(StreamCommand::Reset { reason }).is_err() {
            trace!(stream_id = self.id, "stream driver already gone, reset skipped");
        }
    }

    async fn command(&self, command: impl FnOnce(Ack) -> StreamCommand) -> Result<(), SendError> {
        let (ack, result) = oneshot::channel();
        self.commands.send(command(ack)).await.map_err(|_| SendError::Closed)?;
        result.await.map_err(|_| SendError::Closed)?
    }
}

/// The request-style view of a stream, emitted alongside the stream event.
#[derive(Debug, Clone)]
pub struct Http2ServerRequest {
    stream: ServerStream,
    headers: RawHeaders,
}

impl Http2ServerRequest {
    pub(crate) fn new(stream: ServerStream, headers: RawHeaders) -> Self {
        Self { stream, headers }
    }

    pub fn stream(&self) -> &ServerStream {
        &self.stream
    }

    pub fn headers(&self) -> &RawHeaders {
        &self.headers
    }
}

/// Owns the send side of one stream and executes commands from its [`ServerStream`] handles.
pub(crate) async fn drive(mut respond: SendResponse<Bytes>, mut commands: mpsc::Receiver<StreamCommand>, aborted: CancellationToken) {
    let stream_id = respond.stream_id().as_u32();
    let mut send_stream: Option<SendStream<Bytes>> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!(stream_id, "stream handles dropped before the stream ended, reset stream");
                    reset(&mut respond, send_stream.as_mut(), Reason::CANCEL);
                    return;
                };

                match command {
                    StreamCommand::Respond { response, end_of_stream, ack } => {
                        let result = respond.send_response(response, end_of_stream);
                        let failed = result.is_err();
                        match result {
                            Ok(stream) => {
                                send_stream = Some(stream);
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = ack.send(Err(e.into()));
                            }
                        }
                        if end_of_stream || failed {
                            return;
                        }
                    }
                    StreamCommand::Data { data, ack } => {
                        let Some(stream) = send_stream.as_mut() else {
                            let _ = ack.send(Err(SendError::HeadersNotSent));
                            continue;
                        };
                        let result = write_data(stream, data).await;
                        let failed = result.is_err();
                        let _ = ack.send(result);
                        if failed {
                            aborted.cancel();
                            return;
                        }
                    }
                    StreamCommand::End { ack } => {
                        let result = match send_stream.as_mut() {
                            Some(stream) => stream.send_data(Bytes::new(), true).map_err(SendError::from),
                            None => Err(SendError::HeadersNotSent),
                        };
                        let _ = ack.send(result);
                        return;
                    }
                    StreamCommand::Reset { reason } => {
                        debug!(stream_id, ?reason, "stream reset by server");
                        reset(&mut respond, send_stream.as_mut(), reason);
                        return;
                    }
                }
            }

            peer_reset = reset_by_peer(&mut respond, &mut send_stream) => {
                match peer_reset {
                    Ok(reason) => debug!(stream_id, ?reason, "stream reset by peer"),
                    Err(e) => debug!(stream_id, cause = %e, "stream failed"),
                }
                aborted.cancel();
                return;
            }
        }
    }
}

async fn reset_by_peer(respond: &mut SendResponse<Bytes>, send_stream: &mut Option<SendStream<Bytes>>) -> Result<Reason, h2::Error> {
    poll_fn(|cx| match send_stream.as_mut() {
        Some(stream) => stream.poll_reset(cx),
        None => respond.poll_reset(cx),
    })
    .await
}

fn reset(respond: &mut SendResponse<Bytes>, send_stream: Option<&mut SendStream<Bytes>>, reason: Reason) {
    match send_stream {
        Some(stream) => stream.send_reset(reason),
        None => respond.send_reset(reason),
    }
}

/// Sends `data` as flow-control capacity becomes available.
async fn write_data(stream: &mut SendStream<Bytes>, mut data: Bytes) -> Result<(), SendError> {
    while !data.is_empty() {
        stream.reserve_capacity(data.len());
        let capacity = match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(capacity) => capacity?,
            None => return Err(SendError::Closed),
        };
        if capacity == 0 {
            continue;
        }
        let chunk = data.split_to(capacity.min(data.len()));
        stream.send_data(chunk, false)?;
    }
    Ok(())
}
