use micro_listener::{HandlerFn, HttpContext, Listener, Request, Response};
use micro_transport::Server;
use micro_transport::protocol::BoxError;
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

// curl -v http://127.0.0.1:8080/hello?name=world
// curl -v --http2-prior-knowledge -d "hello world" http://127.0.0.1:8080/echo
async fn echo(request: Request, ctx: HttpContext) -> Result<Response, BoxError> {
    let body = match request.body() {
        Some(_) => request.text().await?,
        None => format!("{:?}\r\n", request.query_pairs()),
    };

    let response = Response::builder()
        .header(http::header::CONTENT_TYPE, "text/plain")
        .header("x-transport", ctx.transport().as_str())
        .body(format!("{} {} from {}\r\n{body}", request.method(), request.path(), ctx.net.remote_address))?;
    Ok(response)
}

async fn access_log(request: Request, ctx: HttpContext) -> Result<(), BoxError> {
    info!(method = %request.method(), url = %request.url(), remote = %ctx.net.remote_address, transport = %ctx.transport(), "request");
    Ok(())
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = Server::new();
    let subscription = match Listener::builder()
        .handler(HandlerFn::named("access_log", access_log))
        .handler(HandlerFn::named("echo", echo))
        .install(&server)
    {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(cause = %e, "install listener error");
            return;
        }
    };

    let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(tcp_listener) => tcp_listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    tokio::select! {
        _ = server.listen(tcp_listener) => {}
        _ = tokio::signal::ctrl_c() => info!("ctrl-c received, shutting down"),
    }

    subscription.uninstall().await;
    server.shutdown().await;
}
