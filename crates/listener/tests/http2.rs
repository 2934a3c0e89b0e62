mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::Http2Client;
use h2::Reason;
use http::StatusCode;
use micro_listener::{
    DEFAULT_ERROR_MESSAGE, HandlerFn, HttpContext, Listener, Request, RequestHandler, Response, ResponseOutput, TransportKind,
    handler_fn, install, send_response,
};
use micro_transport::protocol::BoxError;
use micro_transport::{EventKind, Server, ServerEvent, StreamEvent};
use serde_json::Value;
use tokio::sync::mpsc;

async fn route(request: Request, ctx: HttpContext) -> Result<Response, BoxError> {
    assert_eq!(ctx.transport(), TransportKind::Http2);
    let path = request.path().to_string();

    if let Some(token) = path.strip_prefix("/calls/") {
        return Ok(Response::new(format!("answer to {token}")));
    }
    match path.as_str() {
        "/emptyResponse" => Ok(Response::empty(StatusCode::ACCEPTED)),
        "/echo" => Ok(Response::new(request.text().await?)),
        "/net" => Ok(Response::new(serde_json::to_string(ctx.net())?)),
        "/closing" => Ok(Response::builder().header("connection", "close").header("keep-alive", "timeout=5").body("still fine")?),
        "/withBody" => Ok(Response::new("body for head")),
        "/noContent" => Ok(Response::builder().status(StatusCode::NO_CONTENT).body("oops")?),
        _ => Ok(Response::empty(StatusCode::NOT_FOUND)),
    }
}

fn routes() -> impl RequestHandler {
    HandlerFn::named("routes", route)
}

#[tokio::test]
async fn three_calls_share_one_connection() {
    let server = Server::new();
    let _subscription = install(&server, routes(), None);

    let mut client = Http2Client::connect(&server).await;
    for token in ["call1", "call2", "call3"] {
        let response = client.get(&format!("/calls/{token}")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, format!("answer to {token}"));
    }

    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn stream_is_dispatched_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = Server::new();
    let subscription = install(
        &server,
        handler_fn({
            let calls = Arc::clone(&calls);
            move |_request: Request, _ctx: HttpContext| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(Response::new("once"))
                }
            }
        }),
        None,
    );

    let mut client = Http2Client::connect(&server).await;
    let response = client.get("/").await;
    subscription.uninstall().await;

    assert_eq!(response.body, "once");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_response_with_status_override() {
    let server = Server::new();
    let _subscription = install(&server, routes(), None);

    let mut client = Http2Client::connect(&server).await;
    let response = client.get("/emptyResponse").await;

    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn post_body_is_read_back() {
    let server = Server::new();
    let _subscription = install(&server, routes(), None);

    let mut client = Http2Client::connect(&server).await;
    let response = client.post("/echo", "hello world").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "hello world");
}

#[tokio::test]
async fn net_info_is_reported() {
    let server = Server::new();
    let _subscription = install(&server, routes(), None);

    let mut client = Http2Client::connect(&server).await;
    let response = client.get("/net").await;

    let net: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(net["remoteAddress"], "127.0.0.1");
    assert_eq!(net["ipFamily"], "IPv4");
    assert_eq!(net["localAddress"], "127.0.0.1");
}

#[tokio::test]
async fn connection_headers_are_stripped() {
    let server = Server::new();
    let _subscription = install(&server, routes(), None);

    let mut client = Http2Client::connect(&server).await;
    let response = client.get("/closing").await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.headers.get("connection").is_none());
    assert!(response.headers.get("keep-alive").is_none());
    assert_eq!(response.body, "still fine");
}

#[tokio::test]
async fn failing_handler_gives_generic_500() {
    let server = Server::new();
    let _subscription = Listener::builder()
        .handler(handler_fn(|_request: Request, _ctx: HttpContext| async { Err::<Response, BoxError>("nope".into()) }))
        .install(&server)
        .unwrap();

    let mut client = Http2Client::connect(&server).await;
    let response = client.get("/").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers["content-type"], "text/plain");
    assert!(response.headers.get("connection").is_none());
    assert_eq!(response.body, DEFAULT_ERROR_MESSAGE);
}

#[tokio::test]
async fn head_request_gets_no_body() {
    let server = Server::new();
    let _subscription = install(&server, routes(), None);

    let mut client = Http2Client::connect(&server).await;
    let response = client.head("/withBody").await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());

    // the connection is still usable afterwards
    let response = client.get("/withBody").await;
    assert_eq!(response.body, "body for head");
}

#[tokio::test]
async fn no_content_ends_stream_with_headers() {
    let server = Server::new();
    let _subscription = install(&server, routes(), None);

    let mut client = Http2Client::connect(&server).await;
    let response = client.get("/noContent").await;

    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(response.headers.get("content-length").is_none());
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn reset_stream_aborts_and_drops_the_response() {
    let server = Server::new();
    let (streams_tx, mut streams) = mpsc::unbounded_channel();
    server.add_listener(
        EventKind::Stream,
        Arc::new(move |event: &ServerEvent| -> Result<(), BoxError> {
            if let ServerEvent::Stream(StreamEvent { stream, .. }) = event {
                let _ = streams_tx.send(stream.clone());
            }
            Ok(())
        }),
    );

    let (started_tx, mut started) = mpsc::unbounded_channel();
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let subscription = install(
        &server,
        handler_fn(move |request: Request, _ctx: HttpContext| {
            let started_tx = started_tx.clone();
            let seen_tx = seen_tx.clone();
            async move {
                let _ = started_tx.send(());
                let _ = tokio::time::timeout(Duration::from_secs(2), request.signal().cancelled()).await;
                let _ = seen_tx.send(request.is_aborted());
                Ok::<_, BoxError>(Response::new("too late"))
            }
        }),
        None,
    );

    let mut client = Http2Client::connect(&server).await;
    let (response, mut outgoing) = client.open("GET", "/slow").await;
    started.recv().await.unwrap();
    outgoing.send_reset(Reason::CANCEL);

    assert_eq!(seen.recv().await, Some(true));
    subscription.uninstall().await;

    let stream = streams.recv().await.unwrap();
    assert!(!stream.headers_sent());
    assert!(response.await.is_err());
}

#[tokio::test]
async fn closed_output_sends_nothing() {
    let server = Server::new();
    let (results_tx, mut results) = mpsc::unbounded_channel();
    server.add_listener(
        EventKind::Stream,
        Arc::new(move |event: &ServerEvent| -> Result<(), BoxError> {
            if let ServerEvent::Stream(StreamEvent { stream, .. }) = event {
                stream.reset(Reason::REFUSED_STREAM);
                let output = ResponseOutput::http2(stream.clone(), Vec::new(), false);
                let results_tx = results_tx.clone();
                tokio::spawn(async move {
                    let sent = send_response(&output, Response::new("never written")).await;
                    let _ = results_tx.send((output.is_closed(), output.headers_sent(), sent.is_ok()));
                });
            }
            Ok(())
        }),
    );

    let mut client = Http2Client::connect(&server).await;
    let (response, _outgoing) = client.open("GET", "/").await;

    assert_eq!(results.recv().await, Some((true, false, true)));
    let e = response.await.unwrap_err();
    assert_eq!(e.reason(), Some(Reason::REFUSED_STREAM));
}
