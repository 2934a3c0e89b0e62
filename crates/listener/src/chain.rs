//! Runs every registered handler against one request and picks the response to send.
//!
//! All handlers run concurrently and to completion. The first one to finish with a response
//! decides what is sent; responses finishing later are dropped. A failing or panicking
//! handler, or one returning a response that can't be written, is handed to the error
//! handler, whose answer competes for the same slot.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::context::HttpContext;
use crate::error::HandlerError;
use crate::handler::{ErrorHandler, RequestHandler};
use crate::request::Request;
use crate::response::Response;

/// Default cap of missing-response warnings per subscription.
pub const DEFAULT_MISSING_RESPONSE_WARNINGS: usize = 10;

pub(crate) struct HandlerChain {
    handlers: Vec<Arc<dyn RequestHandler>>,
    error_handler: Arc<dyn ErrorHandler>,
    warnings: MissingResponseWarnings,
}

/// What one handler, error handler included, contributed to a request.
enum Outcome {
    Response(Response),
    Nothing,
    Failed,
}

impl HandlerChain {
    pub(crate) fn new(handlers: Vec<Arc<dyn RequestHandler>>, error_handler: Arc<dyn ErrorHandler>, warning_limit: usize) -> Self {
        Self { handlers, error_handler, warnings: MissingResponseWarnings::new(warning_limit) }
    }

    /// Runs the chain, sending the winning response through `decision` as soon as it is known.
    ///
    /// Returns once every handler finished. When nothing was decided `decision` is dropped.
    pub(crate) async fn run(&self, request: Request, ctx: &HttpContext, decision: oneshot::Sender<Response>) {
        let mut decision = Some(decision);
        let mut silent = Vec::new();
        let mut failed = false;

        let mut pending: FuturesUnordered<_> = self
            .handlers
            .iter()
            .map(|handler| {
                let request = request.clone();
                async move { (handler.name(), self.invoke(handler.as_ref(), request, ctx).await) }
            })
            .collect();
        drop(request);

        while let Some((name, outcome)) = pending.next().await {
            match outcome {
                Outcome::Response(response) => match decision.take() {
                    Some(sender) => {
                        if sender.send(response).is_err() {
                            debug!(handler = name, "response decided but nobody is waiting for it");
                        }
                    }
                    None => debug!(handler = name, status = %response.status(), "discard response, another handler answered first"),
                },
                Outcome::Nothing => silent.push(name),
                Outcome::Failed => failed = true,
            }
        }

        if decision.is_some() && !failed {
            self.warnings.warn(&silent);
        }
    }

    async fn invoke(&self, handler: &dyn RequestHandler, request: Request, ctx: &HttpContext) -> Outcome {
        let result = AssertUnwindSafe(handler.call(request, ctx)).catch_unwind().await;

        let error = match result {
            Ok(Ok(Some(response))) => match response.validate() {
                Ok(()) => return Outcome::Response(response),
                Err(reason) => HandlerError::MalformedResponse { handler: owned_name(handler), reason },
            },
            Ok(Ok(None)) => return Outcome::Nothing,
            Ok(Err(source)) => HandlerError::Failed { handler: owned_name(handler), source },
            Err(panic) => HandlerError::Panicked { handler: owned_name(handler), message: panic_message(panic.as_ref()) },
        };

        self.recover(error, ctx).await
    }

    async fn recover(&self, error: HandlerError, ctx: &HttpContext) -> Outcome {
        let handler = error.handler().to_string();
        let result = AssertUnwindSafe(self.error_handler.handle(error, ctx)).catch_unwind().await;

        match result {
            Ok(Some(response)) => match response.validate() {
                Ok(()) => Outcome::Response(response),
                Err(reason) => {
                    error!(handler = %handler, reason = %reason, "error handler returned a malformed response");
                    Outcome::Failed
                }
            },
            Ok(None) => Outcome::Failed,
            Err(panic) => {
                error!(handler = %handler, cause = %panic_message(panic.as_ref()), "error handler panicked");
                Outcome::Failed
            }
        }
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|handler| handler.name()).collect();
        f.debug_struct("HandlerChain").field("handlers", &names).field("warnings", &self.warnings).finish()
    }
}

fn owned_name(handler: &dyn RequestHandler) -> Cow<'static, str> {
    Cow::Owned(handler.name().to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Counts requests no handler answered, logging only the first `limit` of them.
#[derive(Debug)]
struct MissingResponseWarnings {
    emitted: AtomicUsize,
    limit: usize,
}

impl MissingResponseWarnings {
    fn new(limit: usize) -> Self {
        Self { emitted: AtomicUsize::new(0), limit }
    }

    fn warn(&self, handlers: &[&str]) {
        let emitted = self.emitted.fetch_add(1, Ordering::Relaxed);
        if emitted < self.limit {
            warn!(
                handlers = ?handlers,
                remaining = self.limit - emitted - 1,
                "no handler returned a response, nothing was sent. Did a handler forget to return one?"
            );
        }
    }

    #[cfg(test)]
    fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{Method, StatusCode};
    use micro_transport::protocol::BoxError;
    use micro_transport::{ConnectInfo, Socket};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::context::TransportKind;
    use crate::convert::{RawRequest, build_request};
    use crate::handler::{DefaultErrorHandler, HandlerFn, MockErrorHandler};
    use crate::headers::Headers;
    use crate::net_info::NetInfo;

    fn ctx() -> HttpContext {
        let socket = Socket::new(ConnectInfo::new("10.1.2.3:40000".parse().unwrap()));
        HttpContext::new(NetInfo::from_socket(&socket), TransportKind::Http1)
    }

    fn request() -> Request {
        let token = CancellationToken::new();
        let raw = RawRequest::Http1 { method: &Method::GET, target: "/", encrypted: false };
        build_request(raw, Headers::new(), None, &token).unwrap()
    }

    fn responding(name: &'static str, status: StatusCode, delay: u64) -> Arc<dyn RequestHandler> {
        Arc::new(HandlerFn::named(name, move |_request: Request, _ctx: HttpContext| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, BoxError>(Response::empty(status))
        }))
    }

    fn silent(name: &'static str) -> Arc<dyn RequestHandler> {
        Arc::new(HandlerFn::named(name, |_request: Request, _ctx: HttpContext| async { Ok::<_, BoxError>(()) }))
    }

    fn failing(name: &'static str) -> Arc<dyn RequestHandler> {
        Arc::new(HandlerFn::named(name, |_request: Request, _ctx: HttpContext| async {
            Err::<(), BoxError>("handler failed".into())
        }))
    }

    async fn run(chain: &HandlerChain) -> Option<Response> {
        let (tx, rx) = oneshot::channel();
        chain.run(request(), &ctx(), tx).await;
        rx.await.ok()
    }

    #[tokio::test]
    async fn first_completed_response_wins() {
        let chain = HandlerChain::new(
            vec![responding("slow", StatusCode::ACCEPTED, 50), responding("fast", StatusCode::CREATED, 0)],
            Arc::new(DefaultErrorHandler),
            DEFAULT_MISSING_RESPONSE_WARNINGS,
        );

        let response = run(&chain).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn every_handler_runs_to_completion() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = |delay: u64| -> Arc<dyn RequestHandler> {
            let finished = Arc::clone(&finished);
            Arc::new(HandlerFn::named("counter", move |_request: Request, _ctx: HttpContext| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            }))
        };

        let chain = HandlerChain::new(
            vec![counter(20), responding("answer", StatusCode::OK, 0), counter(40)],
            Arc::new(DefaultErrorHandler),
            DEFAULT_MISSING_RESPONSE_WARNINGS,
        );

        let (tx, rx) = oneshot::channel();
        chain.run(request(), &ctx(), tx).await;

        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert_eq!(rx.await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn decision_is_sent_before_the_chain_finishes() {
        let chain = HandlerChain::new(
            vec![responding("fast", StatusCode::OK, 0), responding("slow", StatusCode::ACCEPTED, 200)],
            Arc::new(DefaultErrorHandler),
            DEFAULT_MISSING_RESPONSE_WARNINGS,
        );

        let (tx, rx) = oneshot::channel();
        let ctx = ctx();
        let run = chain.run(request(), &ctx, tx);
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("chain should still wait for the slow handler"),
            response = rx => assert_eq!(response.unwrap().status(), StatusCode::OK),
        }
        run.await;
    }

    #[tokio::test]
    async fn failure_goes_to_error_handler() {
        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().times(1).returning(|error, _| {
            assert!(matches!(error, HandlerError::Failed { .. }));
            assert_eq!(error.handler(), "broken");
            Some(Response::empty(StatusCode::BAD_GATEWAY))
        });

        let chain = HandlerChain::new(vec![failing("broken")], Arc::new(error_handler), DEFAULT_MISSING_RESPONSE_WARNINGS);

        let response = run(&chain).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(chain.warnings.emitted(), 0);
    }

    #[tokio::test]
    async fn panic_is_a_failure() {
        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().times(1).returning(|error, _| {
            match error {
                HandlerError::Panicked { message, .. } => assert_eq!(message, "kaboom"),
                other => panic!("unexpected error {other}"),
            }
            None
        });

        let panicking: Arc<dyn RequestHandler> = Arc::new(HandlerFn::named("panicking", |_request: Request, _ctx: HttpContext| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, BoxError>(())
        }));
        let chain = HandlerChain::new(vec![panicking], Arc::new(error_handler), DEFAULT_MISSING_RESPONSE_WARNINGS);

        assert!(run(&chain).await.is_none());
        assert_eq!(chain.warnings.emitted(), 0);
    }

    #[tokio::test]
    async fn malformed_response_goes_to_error_handler() {
        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().times(1).returning(|error, _| {
            assert!(matches!(error, HandlerError::MalformedResponse { .. }));
            Some(Response::empty(StatusCode::INTERNAL_SERVER_ERROR))
        });

        let chain = HandlerChain::new(
            vec![responding("informational", StatusCode::CONTINUE, 0)],
            Arc::new(error_handler),
            DEFAULT_MISSING_RESPONSE_WARNINGS,
        );

        let response = run(&chain).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn only_the_second_handler_responds() {
        let mut error_handler = MockErrorHandler::new();
        error_handler.expect_handle().never();

        let chain = HandlerChain::new(
            vec![silent("logger"), responding("answer", StatusCode::ACCEPTED, 10)],
            Arc::new(error_handler),
            DEFAULT_MISSING_RESPONSE_WARNINGS,
        );

        let response = run(&chain).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(chain.warnings.emitted(), 0);
    }

    #[tokio::test]
    async fn missing_response_is_counted() {
        let chain = HandlerChain::new(vec![silent("a"), silent("b")], Arc::new(DefaultErrorHandler), 1);

        assert!(run(&chain).await.is_none());
        assert!(run(&chain).await.is_none());
        assert_eq!(chain.warnings.emitted(), 2);
    }
}
