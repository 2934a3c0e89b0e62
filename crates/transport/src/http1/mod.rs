//! HTTP/1.x connections.
//!
//! A connection handles one exchange at a time. The request is announced with an
//! [`IncomingMessage`] and a [`ServerResponse`] handle; the connection task then serves
//! body reads and response writes for that exchange until the response ends.

mod body_channel;
mod connection;
mod request;
mod response;

pub(crate) use body_channel::BodyReceiver;
pub(crate) use connection::Http1Connection;
pub use request::IncomingMessage;
pub use response::ServerResponse;
