//! Accept loop, per-connection serving and graceful drain.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::error::{ProxyError, json_response};
use crate::proxy_config::ProxyConfig;

/// How long one connection may take to finish after shutdown begins.
const CONNECTION_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Peer address of the connection a request arrived on, stored in the
/// request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Result of waiting for in-flight connections at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: usize },
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Serve `service` on `listener` until `shutdown` is cancelled, then drain.
///
/// Each accepted connection takes a permit from a semaphore sized by
/// `max_concurrent_connections`; when none is left the connection gets a raw
/// 503 and is closed.
pub async fn serve<S, B>(
    listener: TcpListener,
    service: S,
    config: ProxyConfig,
    shutdown: CancellationToken,
) -> DrainResult
where
    S: tower::Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_connections));
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let permit = match semaphore.clone().try_acquire_owned() {
                            Ok(p) => p,
                            Err(_) => {
                                warn!(
                                    peer = %peer_addr,
                                    max_connections = config.max_concurrent_connections,
                                    "Rejected connection: max concurrent connections reached"
                                );
                                tokio::spawn(async move {
                                    let _ = send_503_response(stream).await;
                                });
                                continue;
                            }
                        };

                        if let Err(e) = configure_tcp_stream(&stream, &config) {
                            error!(error = %e, "Failed to configure socket");
                        }

                        let service = service.clone();
                        let conn_shutdown = shutdown.clone();
                        tracker.spawn(async move {
                            handle_connection(stream, peer_addr, service, conn_shutdown).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }

            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping new connections");
                break;
            }
        }
    }

    tracker.close();
    info!(
        active_connections = tracker.len(),
        drain_timeout_secs = config.drain_timeout.as_secs(),
        "Waiting for active connections to drain"
    );

    match tokio::time::timeout(config.drain_timeout, tracker.wait()).await {
        Ok(()) => DrainResult::Complete,
        Err(_) => DrainResult::Timeout {
            remaining: tracker.len(),
        },
    }
}

/// Serve one connection (HTTP/1.1 or HTTP/2) until it closes or shutdown
/// asks it to finish.
async fn handle_connection<S, B>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    service: S,
    shutdown: CancellationToken,
) where
    S: tower::Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let io = TokioIo::new(stream);

    let svc_fn = hyper::service::service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(PeerAddr(peer_addr));
        let svc = service.clone();
        async move {
            let result: Result<_, std::convert::Infallible> = match svc.oneshot(req).await {
                Ok(response) => Ok(response.map(|body| {
                    body.map_err(|e| -> BoxError { e.into() }).boxed()
                })),
                Err(e) => {
                    let e: BoxError = e.into();
                    Ok(error_response(e.as_ref())
                        .map(|body| body.map_err(|never| match never {}).boxed()))
                }
            };
            result
        }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(io, svc_fn);

    tokio::pin!(conn);

    tokio::select! {
        result = &mut conn => {
            if let Err(e) = result {
                debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        }
        _ = shutdown.cancelled() => {
            debug!(peer = %peer_addr, "Shutdown signal received, gracefully closing connection");
            conn.as_mut().graceful_shutdown();
            let _ = tokio::time::timeout(CONNECTION_CLOSE_GRACE, conn).await;
        }
    }
}

/// Map a service error to its JSON response. Forwarding failures keep their
/// 502/504 mapping; anything else is a 500.
fn error_response(e: &(dyn std::error::Error + Send + Sync + 'static)) -> Response<Full<Bytes>> {
    match e.downcast_ref::<ProxyError>() {
        Some(proxy_error) => {
            warn!(
                error = %proxy_error,
                status = proxy_error.status().as_u16(),
                "Forwarding failed"
            );
            proxy_error.to_response()
        }
        None => {
            error!(error = %e, "Service error");
            json_response(
                hyper::StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"detail":"Internal server error"}"#,
            )
        }
    }
}

/// Apply socket options from `config` to an accepted connection.
fn configure_tcp_stream(stream: &TcpStream, config: &ProxyConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    let socket = socket2::SockRef::from(stream);
    let keepalive =
        socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.tcp_keepalive_secs));
    socket.set_tcp_keepalive(&keepalive)?;
    socket.set_recv_buffer_size(config.socket_buffer_size)?;
    socket.set_send_buffer_size(config.socket_buffer_size)?;

    Ok(())
}

/// Raw 503 for connections over the concurrency limit.
///
/// The request head is read first; closing a socket with unread input makes
/// the kernel send a reset, and the client would never see the 503.
async fn send_503_response(mut stream: TcpStream) -> std::io::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut head = [0u8; 4096];
    let _ = tokio::time::timeout(Duration::from_millis(100), stream.read(&mut head)).await;

    let body = r#"{"detail":"Service unavailable: too many concurrent connections"}"#;
    let response = format!(
        "HTTP/1.1 503 Service Unavailable\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Retry-After: 1\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}
