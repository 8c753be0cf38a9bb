//! HTTP server and graceful shutdown.
//!
//! # Request lifecycle
//!
//! ```text
//! hyper request ──► collect body ──► Request ──► spawn_blocking(App::handle) ──► Output
//!                                                                                   │
//! hyper response ◄── Full (text)  or  StreamBody ◄── mpsc ◄── blocking pump ◄──────┘
//! ```
//!
//! The pipeline is synchronous, so it runs on the blocking pool and never
//! stalls the reactor. Stream and chunk bodies are pumped from a blocking
//! task through a bounded channel, one frame per chunk.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **SIGINT** the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::error::{Error, Result};
use crate::multipart;
use crate::present::{Body, Output};
use crate::request::Request;

/// Response body handed to hyper.
pub type HttpBody = UnsyncBoxBody<Bytes, io::Error>;

/// Frames buffered between the blocking pump and the connection.
const STREAM_FRAMES: usize = 8;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Errors
    ///
    /// Fails if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tessera::Server;
    /// let server = Server::bind("0.0.0.0:3000").unwrap();
    /// ```
    pub fn bind(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::internal(format!("invalid socket address `{addr}`: {e}")))?;
        Ok(Self { addr })
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: App) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(app);

        info!(addr = %self.addr, "tessera listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first: a signal stops accepting even with
                // connections queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("tessera stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Routes one request and produces one response. Every failure becomes a
/// response, so hyper never sees an error.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<HttpBody>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(plain(http::StatusCode::BAD_REQUEST));
        }
    };

    let request = match into_request(&parts, body, remote_addr) {
        Ok(request) => request,
        Err(e) => {
            warn!(peer = %remote_addr, path = %parts.uri.path(), "rejecting request body: {e}");
            return Ok(plain(http::StatusCode::from_u16(e.status()).unwrap_or(http::StatusCode::BAD_REQUEST)));
        }
    };
    debug!(method = %parts.method, path = %parts.uri.path(), "dispatching");

    match tokio::task::spawn_blocking(move || app.handle(request)).await {
        Ok(output) => Ok(into_response(output)),
        Err(e) => {
            error!(path = %parts.uri.path(), "request task failed: {e}");
            Ok(plain(http::StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Query fields become request data; repeated headers are joined.
///
/// Form bodies are decoded here, the way a browser sends them:
/// `application/x-www-form-urlencoded` fields and the text parts of
/// `multipart/form-data` join the query fields, and multipart files are
/// spooled to disk. Any other body is handed over as is.
///
/// # Errors
///
/// A malformed multipart body is a bad request; spooling an upload can fail
/// with an I/O error.
pub(crate) fn into_request(parts: &http::request::Parts, body: Bytes, remote_addr: SocketAddr) -> Result<Request> {
    let mut request = Request::new()
        .with_method(parts.method.as_str())
        .with_endpoint(parts.uri.path());

    if let Some(query) = parts.uri.query() {
        match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
            Ok(pairs) => {
                for (key, value) in pairs {
                    request.set(key, value);
                }
            }
            Err(e) => debug!(query, "ignoring malformed query string: {e}"),
        }
    }

    let content_type = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let media = content_type.split(';').next().unwrap_or_default().trim();

    request = if media.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(&body) {
            Ok(pairs) => {
                for (key, value) in pairs {
                    request.set(key, value);
                }
            }
            Err(e) => debug!("ignoring malformed form body: {e}"),
        }
        request.with_decoded_body(body.to_vec())
    } else if let Some(boundary) = multipart::boundary(content_type) {
        multipart::apply(&mut request, &body, &boundary)?;
        request.with_decoded_body(Vec::new())
    } else {
        request.with_body(body.to_vec())
    };

    for name in parts.headers.keys() {
        let separator = if *name == http::header::COOKIE { "; " } else { ", " };
        let values: Vec<&str> = parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if !values.is_empty() {
            request.set_header(name.as_str(), &values.join(separator));
        }
    }

    let host = parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or_default()
        .to_owned();
    request.set_header("REMOTE_ADDR", &remote_addr.ip().to_string());
    Ok(request.with_host(host))
}

pub(crate) fn into_response(mut output: Output) -> http::Response<HttpBody> {
    let mut builder = http::Response::builder().status(output.status());
    for (name, value) in output.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for (name, cookie) in output.cookies() {
        builder = builder.header(http::header::SET_COOKIE, cookie.to_header_value(name));
    }

    let body = match output.take_body() {
        Body::None => Empty::new().map_err(|never| match never {}).boxed_unsync(),
        Body::Text(text) => full(text),
        streaming => stream_body(streaming),
    };

    builder.body(body).unwrap_or_else(|e| {
        error!(status = output.status(), "invalid response: {e}");
        plain(http::StatusCode::INTERNAL_SERVER_ERROR)
    })
}

fn full(text: impl Into<Bytes>) -> HttpBody {
    Full::new(text.into()).map_err(|never| match never {}).boxed_unsync()
}

/// Drains `body` on the blocking pool, one frame per chunk. A client that
/// goes away ends the pump, which drops the source.
fn stream_body(body: Body) -> HttpBody {
    let (tx, rx) = mpsc::channel::<io::Result<Frame<Bytes>>>(STREAM_FRAMES);

    tokio::task::spawn_blocking(move || {
        let pumped = body.for_each_chunk(|chunk| {
            tx.blocking_send(Ok(Frame::data(chunk)))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
        });
        match pumped {
            Ok(sent) => debug!(bytes = sent, "stream body sent"),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => debug!("stream body aborted: {e}"),
            Err(e) => {
                warn!("stream body failed: {e}");
                let _ = tx.blocking_send(Err(e));
            }
        }
    });

    StreamBody::new(ReceiverStream::new(rx)).boxed_unsync()
}

fn plain(status: http::StatusCode) -> http::Response<HttpBody> {
    let mut response = http::Response::new(full(status.canonical_reason().unwrap_or_default()));
    *response.status_mut() = status;
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
