//! Turns transport events into requests and runs them through the handler chain.
//!
//! A dual-protocol server announces every HTTP/2 stream twice: once as a stream event and
//! once as a compatibility request event. Only the stream event is dispatched, the
//! request-style duplicate is recognized and skipped. Each event is classified exactly once
//! into an [`Exchange`] and nothing downstream looks at the raw event again.

use std::fmt;
use std::sync::Arc;

use http::Method;
use micro_transport::protocol::{BoxError, RawHeaders};
use micro_transport::{EventListener, IncomingMessage, RequestEvent, ServerEvent, ServerResponse, ServerStream, StreamEvent};
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use crate::body::RequestBody;
use crate::chain::HandlerChain;
use crate::context::{HttpContext, TransportKind};
use crate::convert::{RawRequest, build_request};
use crate::error::{BuildError, DispatchError, SendResponseError};
use crate::headers::Headers;
use crate::net_info::NetInfo;
use crate::request::Request;
use crate::send::{ResponseOutput, send_response};

/// One unit of work, tagged by the transport that carries it.
#[derive(Debug)]
pub(crate) enum Exchange {
    Http1 { request: IncomingMessage, response: ServerResponse },
    Http2 { stream: ServerStream, headers: RawHeaders },
}

/// Sorts an event into the exchange it starts, `None` for the request-style echo of a stream.
pub(crate) fn classify(event: &ServerEvent) -> Result<Option<Exchange>, DispatchError> {
    match event {
        ServerEvent::Request(RequestEvent::Http1 { request, response }) => {
            Ok(Some(Exchange::Http1 { request: request.clone(), response: response.clone() }))
        }
        ServerEvent::Request(RequestEvent::Http2(compat)) => {
            trace!(stream_id = compat.stream().id(), "skip request event of a stream that is dispatched on its own");
            Ok(None)
        }
        ServerEvent::Stream(StreamEvent { stream, headers }) => {
            Ok(Some(Exchange::Http2 { stream: stream.clone(), headers: headers.clone() }))
        }
        ServerEvent::Request(_) => Err(DispatchError::TransportUnrecognized { event: "request" }),
        _ => Err(DispatchError::TransportUnrecognized { event: "server" }),
    }
}

/// Everything one request needs once it left the event callback.
struct Prepared {
    request: Request,
    ctx: HttpContext,
    output: ResponseOutput,
}

impl Exchange {
    fn prepare(self) -> Result<Prepared, BuildError> {
        match self {
            Exchange::Http1 { request, response } => {
                let headers = Headers::normalize(request.headers());
                let net = NetInfo::from_socket(request.socket());
                let raw = RawRequest::Http1 {
                    method: request.method(),
                    target: request.target(),
                    encrypted: request.socket().is_encrypted(),
                };
                let body = RequestBody::transport(request.body().clone());
                let built = build_request(raw, headers, Some(body), request.aborted())?;

                Ok(Prepared {
                    request: built,
                    ctx: HttpContext::new(net, TransportKind::Http1),
                    output: ResponseOutput::http1(response),
                })
            }
            Exchange::Http2 { stream, headers } => {
                let normalized = Headers::normalize(&headers);
                let net = NetInfo::from_socket(stream.socket());
                let body = RequestBody::transport(stream.body().clone());
                let built = build_request(RawRequest::Http2, normalized, Some(body), stream.aborted())?;
                let head_request = *built.method() == Method::HEAD;

                Ok(Prepared {
                    request: built,
                    ctx: HttpContext::new(net, TransportKind::Http2),
                    output: ResponseOutput::http2(stream, headers.sensitive().to_vec(), head_request),
                })
            }
        }
    }
}

/// Dispatches the events of one subscription.
pub(crate) struct Dispatcher {
    chain: HandlerChain,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub(crate) fn new(chain: HandlerChain) -> Self {
        Self { chain, tasks: TaskTracker::new() }
    }

    /// Stops tracking new work and waits for the requests already in flight.
    pub(crate) async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    async fn serve(&self, prepared: Prepared) {
        let Prepared { request, ctx, output } = prepared;
        let signal = request.signal().clone();
        let (decided, decision) = oneshot::channel();

        let sending = async {
            let Ok(response) = decision.await else {
                trace!(transport = %ctx.transport, "no response for this request");
                return;
            };

            if signal.is_aborted() {
                debug!(transport = %ctx.transport, "request was aborted, discard its response");
                return;
            }

            match send_response(&output, response).await {
                Ok(()) => trace!(transport = %ctx.transport, "response sent"),
                Err(SendResponseError::AlreadyResponded) => {
                    warn!(transport = %ctx.transport, "response headers were already sent, drop the duplicate response")
                }
                Err(e) => error!(transport = %ctx.transport, remote = %ctx.net.remote_address, cause = %e, "failed to send response"),
            }
        };

        tokio::join!(self.chain.run(request, &ctx, decided), sending);
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("chain", &self.chain).field("in_flight", &self.tasks.len()).finish()
    }
}

/// The [`EventListener`] registered for both event kinds.
#[derive(Debug)]
pub(crate) struct DispatchListener {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchListener {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl EventListener for DispatchListener {
    fn on_event(&self, event: &ServerEvent) -> Result<(), BoxError> {
        let Some(exchange) = classify(event)? else {
            return Ok(());
        };
        let prepared = exchange.prepare()?;

        let dispatcher = Arc::clone(&self.dispatcher);
        self.dispatcher.tasks.spawn(async move { dispatcher.serve(prepared).await });
        Ok(())
    }
}
