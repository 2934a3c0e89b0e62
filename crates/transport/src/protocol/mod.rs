//! Core protocol types shared by the HTTP/1.x and HTTP/2 sides of the server.
//!
//! - **Message Handling** ([`message`]): decoder/encoder items
//!   - [`Message`]: Represents either a head or payload chunks
//!   - [`PayloadItem`]: Handles individual payload chunks and EOF
//!   - [`PayloadSize`]: Tracks payload size information
//!
//! - **Heads** ([`head`]): what a peer sent, before any normalization
//!   - [`RawHeaders`]: duplicate-preserving header block, pseudo-headers included
//!   - [`RequestHead`] / [`ResponseHead`]: HTTP/1.x message heads
//!
//! - **Error Handling** ([`error`])
//!   - [`TransportError`]: Top-level error type of a connection
//!   - [`ParseError`]: Request parsing errors
//!   - [`SendError`]: Response sending errors
//!   - [`BodyError`]: Request body reading errors

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod head;
pub use head::PSEUDO_HEADER_PREFIX;
pub use head::RawField;
pub use head::RawHeaders;
pub use head::RequestHead;
pub use head::ResponseHead;

mod error;
pub use error::BodyError;
pub use error::BoxError;
pub use error::ParseError;
pub use error::SendError;
pub use error::TransportError;
