//! Installs a set of handlers on a [`Server`] and removes them again.

use std::fmt;
use std::sync::Arc;

use micro_transport::{EventKind, EventListener, ListenerId, Server};
use tracing::{debug, info};

use crate::chain::{DEFAULT_MISSING_RESPONSE_WARNINGS, HandlerChain};
use crate::dispatcher::{DispatchListener, Dispatcher};
use crate::error::InstallError;
use crate::handler::{DefaultErrorHandler, ErrorHandler, RequestHandler};

/// Installs `handler` on both event kinds of `server`.
///
/// Without an error handler, failures are logged and answered with
/// [`crate::default_error_response`].
pub fn install<H>(server: &Server, handler: H, error_handler: Option<Arc<dyn ErrorHandler>>) -> Subscription
where
    H: RequestHandler + 'static,
{
    let listener = Listener {
        handlers: vec![Arc::new(handler)],
        error_handler: error_handler.unwrap_or_else(|| Arc::new(DefaultErrorHandler)),
        missing_response_warnings: DEFAULT_MISSING_RESPONSE_WARNINGS,
    };
    listener.install(server)
}

/// A configured set of handlers, ready to be installed on any number of servers.
pub struct Listener {
    handlers: Vec<Arc<dyn RequestHandler>>,
    error_handler: Arc<dyn ErrorHandler>,
    missing_response_warnings: usize,
}

impl Listener {
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::new()
    }

    /// Subscribes to `server`. Every installation gets its own dispatcher, so several
    /// subscriptions on one server run independently of each other.
    pub fn install(&self, server: &Server) -> Subscription {
        let chain = HandlerChain::new(self.handlers.clone(), Arc::clone(&self.error_handler), self.missing_response_warnings);
        let dispatcher = Arc::new(Dispatcher::new(chain));

        let listener: Arc<dyn EventListener> = Arc::new(DispatchListener::new(Arc::clone(&dispatcher)));
        let request = server.add_listener(EventKind::Request, Arc::clone(&listener));
        let stream = server.add_listener(EventKind::Stream, listener);
        info!(handlers = self.handlers.len(), %request, %stream, "listener installed");

        Subscription { server: server.clone(), request, stream, dispatcher }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|handler| handler.name()).collect();
        f.debug_struct("Listener")
            .field("handlers", &names)
            .field("missing_response_warnings", &self.missing_response_warnings)
            .finish()
    }
}

/// Configures a [`Listener`].
///
/// | option                      | default                     |
/// |-----------------------------|-----------------------------|
/// | `handler`                   | required, repeatable        |
/// | `error_handler`             | [`DefaultErrorHandler`]     |
/// | `missing_response_warnings` | 10                          |
pub struct ListenerBuilder {
    handlers: Vec<Arc<dyn RequestHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    missing_response_warnings: usize,
}

impl ListenerBuilder {
    fn new() -> Self {
        Self { handlers: Vec::new(), error_handler: None, missing_response_warnings: DEFAULT_MISSING_RESPONSE_WARNINGS }
    }

    /// Adds a handler. Every handler sees every request.
    pub fn handler<H: RequestHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn error_handler<E: ErrorHandler + 'static>(mut self, error_handler: E) -> Self {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    /// How many requests without any response are logged before going quiet.
    pub fn missing_response_warnings(mut self, max: usize) -> Self {
        self.missing_response_warnings = max;
        self
    }

    pub fn build(self) -> Result<Listener, InstallError> {
        if self.handlers.is_empty() {
            return Err(InstallError::NoHandlers);
        }

        Ok(Listener {
            handlers: self.handlers,
            error_handler: self.error_handler.unwrap_or_else(|| Arc::new(DefaultErrorHandler)),
            missing_response_warnings: self.missing_response_warnings,
        })
    }

    pub fn install(self, server: &Server) -> Result<Subscription, InstallError> {
        Ok(self.build()?.install(server))
    }
}

impl fmt::Debug for ListenerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBuilder")
            .field("handlers", &self.handlers.len())
            .field("error_handler", &self.error_handler.is_some())
            .field("missing_response_warnings", &self.missing_response_warnings)
            .finish()
    }
}

/// An installed [`Listener`]. Dropping it leaves the listener installed.
#[must_use = "a subscription can only be removed through `uninstall`"]
#[derive(Debug)]
pub struct Subscription {
    server: Server,
    request: ListenerId,
    stream: ListenerId,
    dispatcher: Arc<Dispatcher>,
}

impl Subscription {
    /// Requests of this subscription that are still running their handlers or being sent.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Detaches from the server, then waits for the requests already dispatched to finish.
    pub async fn uninstall(self) {
        self.server.remove_listener(EventKind::Request, self.request);
        self.server.remove_listener(EventKind::Stream, self.stream);
        debug!(request = %self.request, stream = %self.stream, in_flight = self.in_flight(), "listener removed, wait for in-flight requests");

        self.dispatcher.drain().await;
        info!(request = %self.request, stream = %self.stream, "listener uninstalled");
    }
}
