use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::codec::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS};
use crate::connection;
use crate::event::{EventKind, EventListener, ListenerId, ServerEvent};
use crate::protocol::TransportError;
use crate::socket::ConnectInfo;

/// Server settings, see [`ServerBuilder`] for the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub allow_http1: bool,
    pub allow_http2: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_header_bytes: usize,
    pub max_headers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allow_http1: true,
            allow_http2: true,
            max_concurrent_streams: 128,
            initial_window_size: 65_535,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

/// Builds a [`Server`].
///
/// | setting                  | default |
/// |--------------------------|---------|
/// | `allow_http1`            | `true`  |
/// | `allow_http2`            | `true`  |
/// | `max_concurrent_streams` | 128     |
/// | `initial_window_size`    | 65535   |
/// | `max_header_bytes`       | 8 KiB   |
/// | `max_headers`            | 64      |
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn allow_http1(mut self, allow: bool) -> Self {
        self.config.allow_http1 = allow;
        self
    }

    pub fn allow_http2(mut self, allow: bool) -> Self {
        self.config.allow_http2 = allow;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = max;
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    pub fn max_header_bytes(mut self, max: usize) -> Self {
        self.config.max_header_bytes = max;
        self
    }

    pub fn max_headers(mut self, max: usize) -> Self {
        self.config.max_headers = max;
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(Inner {
                config: self.config,
                request_listeners: ArcSwap::from_pointee(Vec::new()),
                stream_listeners: ArcSwap::from_pointee(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                connections: AtomicUsize::new(0),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

#[derive(Clone)]
struct Registered {
    id: ListenerId,
    listener: Arc<dyn EventListener>,
}

struct Inner {
    config: ServerConfig,
    request_listeners: ArcSwap<Vec<Registered>>,
    stream_listeners: ArcSwap<Vec<Registered>>,
    next_listener_id: AtomicU64,
    connections: AtomicUsize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// A dual-protocol HTTP server handle.
///
/// Each connection speaks either HTTP/1.x or HTTP/2, detected from the first bytes the
/// client sends. The server itself does nothing with requests: it emits them as
/// [`ServerEvent`]s to whatever listeners are registered. Clones share everything.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn add_listener(&self, kind: EventKind, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let registered = Registered { id, listener };
        self.listeners(kind).rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(registered.clone());
            next
        });
        id
    }

    /// Removes a listener, returning whether it was registered.
    ///
    /// Emissions already in progress still reach it.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let previous = self.listeners(kind).rcu(|current| current.iter().filter(|r| r.id != id).cloned().collect::<Vec<_>>());
        previous.iter().any(|r| r.id == id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners(kind).load().len()
    }

    fn listeners(&self, kind: EventKind) -> &ArcSwap<Vec<Registered>> {
        match kind {
            EventKind::Request => &self.inner.request_listeners,
            EventKind::Stream => &self.inner.stream_listeners,
        }
    }

    /// Hands `event` to every listener of its kind, stopping at the first failure.
    pub(crate) fn emit(&self, event: ServerEvent) -> Result<(), TransportError> {
        let listeners = self.listeners(event.kind()).load_full();
        for registered in listeners.iter() {
            if let Err(e) = registered.listener.on_event(&event) {
                error!(cause = %e, listener = %registered.id, "event listener failed");
                return Err(TransportError::listener(e));
            }
        }
        Ok(())
    }

    /// Accepts connections from `listener` until [`Server::shutdown`] is called.
    pub async fn listen(&self, listener: TcpListener) {
        if let Ok(address) = listener.local_addr() {
            info!(%address, "start listening");
        }

        loop {
            let accepted = tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    info!("server shutting down, stop accepting");
                    return;
                }
                accepted = listener.accept() => accepted,
            };

            let (tcp_stream, remote) = match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            if let Err(e) = tcp_stream.set_nodelay(true) {
                warn!(cause = %e, "failed to set nodelay");
            }
            let mut info = ConnectInfo::new(remote);
            info.local = tcp_stream.local_addr().ok();

            let server = self.clone();
            self.inner.tracker.spawn(async move {
                match server.serve_connection(tcp_stream, info).await {
                    Ok(_) => info!("finished process, connection shutdown"),
                    Err(e) => error!("service has error, cause {}, connection shutdown", e),
                }
            });
        }
    }

    /// Serves a single connection on the current task until it is closed.
    pub async fn serve_connection<IO>(&self, io: IO, info: ConnectInfo) -> Result<(), TransportError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_shutdown() {
            info!(remote = %info.remote, "server is shutting down, refuse connection");
            return Ok(());
        }

        self.inner.connections.fetch_add(1, Ordering::Relaxed);
        self.inner.tracker.track_future(connection::serve(self.clone(), io, info)).await
    }

    /// Number of connections served so far.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.load(Ordering::Relaxed)
    }

    /// Stops accepting, lets open connections finish their in-flight work and waits for them.
    ///
    /// HTTP/2 connections are sent a GOAWAY; idle HTTP/1.x connections are closed and busy
    /// ones are closed after their current exchange.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("server shutdown complete");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(task);
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("request_listeners", &self.listener_count(EventKind::Request))
            .field("stream_listeners", &self.listener_count(EventKind::Stream))
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BoxError;

    #[test]
    fn listeners_are_added_and_removed_per_kind() {
        let server = Server::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let id = server.add_listener(
            EventKind::Request,
            Arc::new(move |_: &ServerEvent| -> Result<(), BoxError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        assert_eq!(server.listener_count(EventKind::Request), 1);
        assert_eq!(server.listener_count(EventKind::Stream), 0);
        assert!(!server.remove_listener(EventKind::Stream, id));
        assert!(server.remove_listener(EventKind::Request, id));
        assert!(!server.remove_listener(EventKind::Request, id));
        assert_eq!(server.listener_count(EventKind::Request), 0);
    }

    #[test]
    fn builder_overrides_defaults() {
        let server = Server::builder().allow_http1(false).max_headers(16).build();
        assert!(!server.config().allow_http1);
        assert!(server.config().allow_http2);
        assert_eq!(server.config().max_headers, 16);
        assert_eq!(server.config().max_header_bytes, 8 * 1024);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_connections() {
        let server = Server::new();
        server.shutdown().await;

        let (io, _peer) = tokio::io::duplex(64);
        let info = ConnectInfo::new("127.0.0.1:9000".parse().unwrap());
        server.serve_connection(io, info).await.unwrap();
        assert_eq!(server.connection_count(), 0);
    }
}
