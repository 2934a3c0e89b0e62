#![allow(dead_code, reason = "each test binary uses its own subset")]

use std::net::SocketAddr;

use bytes::Bytes;
use h2::SendStream;
use h2::client::{ResponseFuture, SendRequest};
use http::{HeaderMap, StatusCode};
use micro_transport::{ConnectInfo, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const REMOTE: &str = "127.0.0.1:50312";
pub const LOCAL: &str = "127.0.0.1:8080";

pub fn info() -> ConnectInfo {
    let remote: SocketAddr = REMOTE.parse().unwrap();
    ConnectInfo::new(remote).with_local(LOCAL.parse().unwrap())
}

/// Writes `raw` on a fresh connection and reads until the server closes it.
pub async fn http1_roundtrip(server: &Server, raw: &str) -> String {
    let (mut client, io) = tokio::io::duplex(16 * 1024);
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve_connection(io, info()).await }
    });

    client.write_all(raw.as_bytes()).await.unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).await.unwrap();
    let _ = serving.await.unwrap();
    out
}

/// Body of an HTTP/1.x response, everything after the head.
pub fn http1_body(out: &str) -> &str {
    out.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or_default()
}

pub struct Http2Client {
    send_request: SendRequest<Bytes>,
}

#[derive(Debug)]
pub struct Http2Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Http2Client {
    /// Opens one HTTP/2 connection to `server`.
    pub async fn connect(server: &Server) -> Self {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn({
            let server = server.clone();
            async move {
                let _ = server.serve_connection(server_io, info()).await;
            }
        });

        let (send_request, connection) = h2::client::handshake(client_io).await.unwrap();
        tokio::spawn(async move {
            let _ = connection.await;
        });

        Self { send_request }
    }

    pub async fn get(&mut self, path: &str) -> Http2Response {
        self.send("GET", path, None).await
    }

    pub async fn head(&mut self, path: &str) -> Http2Response {
        self.send("HEAD", path, None).await
    }

    pub async fn post(&mut self, path: &str, body: &'static str) -> Http2Response {
        self.send("POST", path, Some(Bytes::from_static(body.as_bytes()))).await
    }

    /// Sends a bodiless request and hands back both halves of its stream without waiting.
    pub async fn open(&mut self, method: &str, path: &str) -> (ResponseFuture, SendStream<Bytes>) {
        let request = http::Request::builder().method(method).uri(format!("http://localhost{path}")).body(()).unwrap();
        let mut send_request = self.send_request.clone().ready().await.unwrap();
        send_request.send_request(request, true).unwrap()
    }

    async fn send(&mut self, method: &str, path: &str, body: Option<Bytes>) -> Http2Response {
        let request = http::Request::builder().method(method).uri(format!("http://localhost{path}")).body(()).unwrap();

        let mut send_request = self.send_request.clone().ready().await.unwrap();
        let (response, mut outgoing) = send_request.send_request(request, body.is_none()).unwrap();
        if let Some(body) = body {
            outgoing.send_data(body, true).unwrap();
        }

        let (parts, mut incoming) = response.await.unwrap().into_parts();
        let mut body = Vec::new();
        while let Some(chunk) = incoming.data().await {
            let chunk = chunk.unwrap();
            incoming.flow_control().release_capacity(chunk.len()).unwrap();
            body.extend_from_slice(&chunk);
        }

        Http2Response { status: parts.status, headers: parts.headers, body: String::from_utf8(body).unwrap() }
    }
}
