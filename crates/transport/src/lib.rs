//! A dual-protocol HTTP event source
//!
//! This crate accepts connections speaking either HTTP/1.x or HTTP/2 on the same listener
//! and turns every request into an event. It does not route or answer anything by itself:
//! listeners registered on the [`Server`] receive the events together with handles that
//! read the request body and write the response.
//!
//! # Features
//!
//! - HTTP/1.1 and HTTP/1.0 with keep-alive and pipelining
//! - HTTP/2 with prior knowledge, detected from the connection preface
//! - Streaming request and response bodies with backpressure
//! - Chunked transfer encoding
//! - Expect-continue mechanism
//! - Graceful shutdown that waits for in-flight connections
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::{HeaderMap, StatusCode};
//! use micro_transport::protocol::{BoxError, PayloadSize};
//! use micro_transport::{EventKind, RequestEvent, Server, ServerEvent};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::new();
//!     server.add_listener(
//!         EventKind::Request,
//!         Arc::new(|event: &ServerEvent| -> Result<(), BoxError> {
//!             if let ServerEvent::Request(RequestEvent::Http1 { response, .. }) = event {
//!                 let response = response.clone();
//!                 tokio::spawn(async move {
//!                     let body = Bytes::from_static(b"Hello World!\r\n");
//!                     let size = PayloadSize::new_length(body.len() as u64);
//!                     let _ = response.write_head(StatusCode::OK, "OK", HeaderMap::new(), size).await;
//!                     let _ = response.write(body).await;
//!                     let _ = response.end().await;
//!                 });
//!             }
//!             Ok(())
//!         }),
//!     );
//!
//!     server.listen(TcpListener::bind("127.0.0.1:8080").await?).await;
//!     Ok(())
//! }
//! ```
//!
//! # Events
//!
//! - [`RequestEvent::Http1`]: one per HTTP/1.x request, carrying an [`IncomingMessage`] and
//!   its [`ServerResponse`].
//! - [`StreamEvent`]: one per HTTP/2 stream, carrying a [`ServerStream`] and the raw header
//!   block.
//! - [`RequestEvent::Http2`]: a request-style notification for every HTTP/2 stream, sent
//!   right after the stream event. Listeners that handle streams should ignore it.
//!
//! # Error Handling
//!
//! - [`protocol::TransportError`]: Top-level error of a connection
//! - [`protocol::ParseError`]: Request parsing errors
//! - [`protocol::SendError`]: Response sending errors
//! - [`protocol::BodyError`]: Request body errors

pub mod codec;
pub mod protocol;

mod body;
mod connection;
mod event;
mod http1;
mod http2;
mod server;
mod socket;
mod utils;

pub use body::{IncomingBody, SharedBody};
pub use event::{EventKind, EventListener, ListenerId, RequestEvent, ServerEvent, StreamEvent};
pub use http1::{IncomingMessage, ServerResponse};
pub use http2::{Http2ServerRequest, ServerStream};
pub use server::{Server, ServerBuilder, ServerConfig};
pub use socket::{ConnectInfo, Socket, TlsSession, TlsVersion};

pub use h2::Reason;
