use std::sync::Arc;

use http::{Method, Version};
use tokio_util::sync::CancellationToken;

use crate::body::{IncomingBody, SharedBody};
use crate::protocol::{BodyError, RawHeaders, RequestHead};
use crate::socket::Socket;

/// The request half of an HTTP/1.x exchange.
///
/// Cloning is cheap and every clone refers to the same exchange: the body can be claimed
/// from any of them, once.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    head: Arc<RequestHead>,
    socket: Arc<Socket>,
    body: SharedBody,
    aborted: CancellationToken,
}

impl IncomingMessage {
    pub(crate) fn new(head: RequestHead, socket: Arc<Socket>, body: SharedBody, aborted: CancellationToken) -> Self {
        Self { head: Arc::new(head), socket, body, aborted }
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    /// The request target as sent, usually an origin-form path with an optional query.
    pub fn target(&self) -> &str {
        self.head.target()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &RawHeaders {
        self.head.headers()
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub fn body(&self) -> &SharedBody {
        &self.body
    }

    pub fn take_body(&self) -> Result<IncomingBody, BodyError> {
        self.body.claim()
    }

    /// Fires when the peer goes away before the response is complete.
    pub fn aborted(&self) -> &CancellationToken {
        &self.aborted
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }
}
