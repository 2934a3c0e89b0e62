//! One request/response model for HTTP/1.x and HTTP/2
//!
//! This crate attaches to a [`micro_transport::Server`] and turns its raw events into a
//! transport-agnostic [`Request`]. It hands that request to the registered
//! [`RequestHandler`]s and writes the [`Response`] they return back onto whichever
//! transport delivered the request.
//!
//! # Features
//!
//! - HTTP/2 streams are dispatched once, even though the server announces them twice
//! - Header normalization with first-value-wins for single-valued fields
//! - Connection metadata ([`NetInfo`]) for every request
//! - Several handlers per request, the first response wins
//! - Failing and panicking handlers answered by an [`ErrorHandler`]
//! - Streaming request and response bodies
//!
//! # Example
//!
//! ```no_run
//! use micro_listener::{HttpContext, Request, Response, handler_fn, install};
//! use micro_transport::Server;
//! use micro_transport::protocol::BoxError;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::new();
//!     let subscription = install(
//!         &server,
//!         handler_fn(|request: Request, ctx: HttpContext| async move {
//!             let body = format!("{} {} from {}\n", request.method(), request.path(), ctx.net.remote_address);
//!             Ok::<_, BoxError>(Response::new(body))
//!         }),
//!         None,
//!     );
//!
//!     server.listen(TcpListener::bind("127.0.0.1:8080").await?).await;
//!     subscription.uninstall().await;
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! - [`DispatchError`]: an event this crate does not know how to handle
//! - [`BuildError`]: a request that could not be rebuilt from its transport fields
//! - [`HandlerError`]: what the [`ErrorHandler`] is given
//! - [`SendResponseError`]: writing the response failed, or it was already written
//! - [`BodyError`]: reading the request body failed

mod body;
mod chain;
mod context;
mod convert;
mod dispatcher;
mod error;
mod handler;
mod headers;
mod listener;
mod net_info;
mod request;
mod response;
mod send;

pub use body::{BoxBody, RequestBody, ResponseBody};
pub use chain::DEFAULT_MISSING_RESPONSE_WARNINGS;
pub use context::{HttpContext, TransportKind};
pub use error::{BodyError, BuildError, DispatchError, HandlerError, InstallError, SendResponseError};
pub use handler::{
    DEFAULT_ERROR_MESSAGE, DefaultErrorHandler, ErrorHandler, ErrorHandlerFn, HandlerFn, RequestHandler, Responder,
    default_error_response, error_handler_fn, handler_fn,
};
pub use headers::{Headers, discards_duplicates};
pub use listener::{Listener, ListenerBuilder, Subscription, install};
pub use net_info::{IpFamily, NetInfo, TlsInfo};
pub use request::{AbortSignal, Request};
pub use response::{Head, Response, ResponseBuilder};
pub use send::{ResponseOutput, send_response};
