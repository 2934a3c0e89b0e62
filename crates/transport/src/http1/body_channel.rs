//! Pull-based body channel between a connection task and a request body.
//!
//! The [`BodyReceiver`] asks for one chunk at a time over a signal channel; the
//! [`BodySender`], running inside the connection task, answers each ask with one payload
//! item. While it waits it reads at most [`READ_AHEAD`] items ahead, which is how a peer
//! that hangs up on an unread body gets noticed.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use tracing::{debug, error, trace, warn};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};

/// Payload items buffered before anybody asked for them.
const READ_AHEAD: usize = 2;

pub(crate) fn body_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (BodySender<'_, S>, BodyReceiver)
where
    S: Stream<Item = Result<Message<(RequestHead, PayloadSize)>, ParseError>> + Unpin,
{
    let (signal_sender, signal_receiver) = mpsc::channel(8);
    let (data_sender, data_receiver) = mpsc::channel(8);

    (
        BodySender {
            payload_stream,
            signal_receiver,
            data_sender,
            read_ahead: VecDeque::with_capacity(READ_AHEAD),
            empty: payload_size.is_empty(),
            eof: false,
        },
        BodyReceiver { signal_sender, data_receiver, payload_size, in_flight: false, eof: payload_size.is_empty() },
    )
}

#[derive(Debug)]
pub(crate) struct RequestData;

pub(crate) struct BodySender<'conn, S> {
    payload_stream: &'conn mut S,
    signal_receiver: mpsc::Receiver<RequestData>,
    data_sender: mpsc::Sender<Result<PayloadItem, ParseError>>,
    read_ahead: VecDeque<PayloadItem>,
    empty: bool,
    /// The last payload item has been read from the connection.
    eof: bool,
}

impl<S> BodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHead, PayloadSize)>, ParseError>> + Unpin,
{
    /// Serves chunk requests until the body is read from the connection or the receiver is
    /// gone. Items read ahead are handed over without waiting to be asked.
    ///
    /// A peer that disconnects before the body ends is reported as a disconnect error, even
    /// if nobody asked for the body.
    pub(crate) async fn start(&mut self) -> Result<(), ParseError> {
        if self.empty {
            return self.skip_data().await;
        }

        loop {
            if self.eof {
                self.hand_over().await;
                return Ok(());
            }

            tokio::select! {
                signal = self.signal_receiver.next() => {
                    let Some(RequestData) = signal else {
                        return self.skip_data().await;
                    };

                    let payload_item = match self.read_ahead.pop_front() {
                        Some(payload_item) => payload_item,
                        None => match read_data(&mut *self.payload_stream).await {
                            Ok(payload_item) => {
                                self.eof = payload_item.is_eof();
                                payload_item
                            }
                            Err(e) => return self.fail(e).await,
                        },
                    };
                    if self.data_sender.send(Ok(payload_item)).await.is_err() {
                        trace!("body receiver dropped while a chunk was in flight");
                    }
                }

                result = read_data(&mut *self.payload_stream), if self.read_ahead.len() < READ_AHEAD => match result {
                    Ok(payload_item) => {
                        self.eof = payload_item.is_eof();
                        self.read_ahead.push_back(payload_item);
                    }
                    Err(e) => return self.fail(e).await,
                },
            }
        }
    }

    /// Reads and drops the rest of the body so the next request can be decoded.
    pub(crate) async fn skip_data(&mut self) -> Result<(), ParseError> {
        let mut size: usize = self.read_ahead.drain(..).filter_map(|item| item.as_bytes().map(Bytes::len)).sum();
        while !self.eof {
            let payload_item = read_data(&mut *self.payload_stream).await?;
            if let Some(bytes) = payload_item.as_bytes() {
                size += bytes.len();
            }
            self.eof = payload_item.is_eof();
        }
        if size > 0 {
            trace!(size, "skipped unread request body");
        }
        Ok(())
    }

    async fn hand_over(&mut self) {
        while let Some(payload_item) = self.read_ahead.pop_front() {
            if self.data_sender.send(Ok(payload_item)).await.is_err() {
                trace!("body receiver dropped before the body was read");
                self.read_ahead.clear();
                return;
            }
        }
    }

    async fn fail(&mut self, e: ParseError) -> Result<(), ParseError> {
        if e.is_disconnect() {
            debug!(cause = %e, "peer went away in the middle of a request body");
        } else {
            warn!(cause = %e, "failed to read request body");
        }
        self.hand_over().await;
        let _ = self.data_sender.send(Err(ParseError::invalid_body(&e))).await;
        Err(e)
    }
}

async fn read_data<S>(payload_stream: &mut S) -> Result<PayloadItem, ParseError>
where
    S: Stream<Item = Result<Message<(RequestHead, PayloadSize)>, ParseError>> + Unpin,
{
    match payload_stream.next().await {
        Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
        Some(Ok(Message::Header(_))) => {
            error!("should not receive header in BodySender");
            Err(ParseError::invalid_body("should not receive header in BodySender"))
        }
        Some(Err(e)) => Err(e),
        None => Err(ParseError::UnexpectedEof),
    }
}

#[derive(Debug)]
pub(crate) struct BodyReceiver {
    signal_sender: mpsc::Sender<RequestData>,
    data_receiver: mpsc::Receiver<Result<PayloadItem, ParseError>>,
    payload_size: PayloadSize,
    in_flight: bool,
    eof: bool,
}

impl Body for BodyReceiver {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.eof {
            return Poll::Ready(None);
        }

        if !this.in_flight {
            match Pin::new(&mut this.signal_sender).poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if let Err(e) = Pin::new(&mut this.signal_sender).start_send(RequestData) {
                        error!(cause = %e, "failed to request body data");
                        return Poll::Ready(Some(Err(ParseError::invalid_body("connection is gone"))));
                    }
                    this.in_flight = true;
                }
                // the sender stopped listening, what it handed over is still queued
                Poll::Ready(Err(_)) => {}
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.data_receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(PayloadItem::Chunk(bytes)))) => {
                this.in_flight = false;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(Ok(PayloadItem::Eof))) => {
                this.in_flight = false;
                this.eof = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.in_flight = false;
                this.eof = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.in_flight = false;
                this.eof = true;
                Poll::Ready(Some(Err(ParseError::invalid_body("connection is gone"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.eof
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

impl From<SizeHint> for PayloadSize {
    fn from(size_hint: SizeHint) -> Self {
        match size_hint.exact() {
            Some(length) => PayloadSize::new_length(length),
            None => PayloadSize::new_chunked(),
        }
    }
}

impl From<PayloadSize> for SizeHint {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => SizeHint::with_exact(length),
            PayloadSize::Chunked => SizeHint::new(),
            PayloadSize::Empty => SizeHint::with_exact(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::task::noop_waker_ref;
    use http_body_util::BodyExt;

    fn receiver(payload_size: PayloadSize) -> (mpsc::Receiver<RequestData>, mpsc::Sender<Result<PayloadItem, ParseError>>, BodyReceiver) {
        let (signal_sender, signal_receiver) = mpsc::channel(8);
        let (data_sender, data_receiver) = mpsc::channel(8);
        let body = BodyReceiver { signal_sender, data_receiver, payload_size, in_flight: false, eof: payload_size.is_empty() };
        (signal_receiver, data_sender, body)
    }

    #[tokio::test]
    async fn requests_one_chunk_at_a_time() {
        let (mut signal_receiver, mut data_sender, mut body) = receiver(PayloadSize::new_chunked());
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(Pin::new(&mut body).poll_frame(&mut cx).is_pending());
        assert!(matches!(signal_receiver.next().await, Some(RequestData)));

        assert!(Pin::new(&mut body).poll_frame(&mut cx).is_pending());
        assert!(signal_receiver.next().now_or_never().is_none());

        data_sender.try_send(Ok(PayloadItem::Chunk(Bytes::from_static(b"hello")))).unwrap();
        match Pin::new(&mut body).poll_frame(&mut cx) {
            Poll::Ready(Some(Ok(frame))) => assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"hello")),
            other => panic!("unexpected poll result: {other:?}"),
        }

        assert!(Pin::new(&mut body).poll_frame(&mut cx).is_pending());
        data_sender.try_send(Ok(PayloadItem::Eof)).unwrap();
        assert!(matches!(Pin::new(&mut body).poll_frame(&mut cx), Poll::Ready(None)));
        assert!(body.is_end_stream());
    }

    #[test]
    fn empty_body_never_signals() {
        let (mut signal_receiver, _data_sender, mut body) = receiver(PayloadSize::new_empty());
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(matches!(Pin::new(&mut body).poll_frame(&mut cx), Poll::Ready(None)));
        assert!(signal_receiver.try_next().is_err());
        assert_eq!(body.size_hint().exact(), Some(0));
    }

    #[tokio::test]
    async fn sender_drains_unread_body() {
        let items: Vec<Result<Message<(RequestHead, PayloadSize)>, ParseError>> = vec![
            Ok(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"abc")))),
            Ok(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"def")))),
            Ok(Message::Payload(PayloadItem::Eof)),
        ];
        let mut stream = futures::stream::iter(items);

        let (mut sender, receiver) = body_channel(&mut stream, PayloadSize::new_chunked());
        drop(receiver);

        sender.start().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn short_body_is_handed_over_unasked() {
        let items: Vec<Result<Message<(RequestHead, PayloadSize)>, ParseError>> =
            vec![Ok(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"hello")))), Ok(Message::Payload(PayloadItem::Eof))];
        let mut stream = futures::stream::iter(items);

        let (mut sender, receiver) = body_channel(&mut stream, PayloadSize::new_length(5));
        sender.start().await.unwrap();
        drop(sender);

        let body = receiver.collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn hang_up_on_unread_body_is_a_disconnect() {
        let items: Vec<Result<Message<(RequestHead, PayloadSize)>, ParseError>> =
            vec![Ok(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"hel"))))];
        let mut stream = futures::stream::iter(items);

        let (mut sender, _receiver) = body_channel(&mut stream, PayloadSize::new_length(5));
        let e = sender.start().await.unwrap_err();
        assert!(e.is_disconnect());
    }
}
