//! Server front end
//!
//! Binds a TCP listener, accepts serially, and hands each connection to
//! its own task. [`Server::close`] stops accepting; connections already
//! in flight finish their current response and then wind down.

mod conn;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::handler::{ArcHandler, Recovery};
use crate::protocol::StatusCode;
use crate::response::Response;

pub(crate) use conn::serve_connection;
use conn::ConnConfig;

/// Server configuration.
///
/// `None` timeouts disable the corresponding deadline. Without a
/// keep-alive timeout every connection closes after one request cycle.
pub struct ServerOpts {
    /// Bind endpoint.
    pub addr: String,

    /// Deadline for reading one request, headers and body.
    pub read_timeout: Option<Duration>,

    /// Deadline for writing one response.
    pub write_timeout: Option<Duration>,

    /// Idle deadline between requests on one connection.
    pub keep_alive_timeout: Option<Duration>,

    /// Maps a handler panic to the response written before closing.
    /// Defaults to logging plus a 500.
    pub recovery: Option<Recovery>,
}

impl Default for ServerOpts {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:42069".to_string(),
            read_timeout: None,
            write_timeout: None,
            keep_alive_timeout: None,
            recovery: None,
        }
    }
}

/// The default recovery: log the panic, answer 500.
pub fn default_recovery() -> Recovery {
    Arc::new(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(%reason, "recovered from handler panic");

        Response::text(StatusCode::INTERNAL_SERVER_ERROR.reason())
            .with_status(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

/// A running HTTP server.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Server {
    /// Binds and starts serving. Fatal bind errors are returned to the
    /// caller; per-connection errors only ever close their connection.
    pub async fn serve(opts: ServerOpts, handler: ArcHandler) -> io::Result<Server> {
        let listener = TcpListener::bind(opts.addr.as_str()).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let config = Arc::new(ConnConfig {
            read_timeout: opts.read_timeout,
            write_timeout: opts.write_timeout,
            keep_alive_timeout: opts.keep_alive_timeout,
            recovery: opts.recovery.unwrap_or_else(default_recovery),
        });

        info!(%local_addr, "server listening");
        tokio::spawn(accept_loop(listener, handler, config, shutdown.clone()));

        Ok(Server { local_addr, shutdown })
    }

    /// The address the listener actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections. In-flight handlers finish their
    /// current response.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: ArcHandler,
    config: Arc<ConnConfig>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("listener closed, no longer accepting");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote_addr)) => {
                trace!(%remote_addr, "accepted connection");
                let handler = Arc::clone(&handler);
                let config = Arc::clone(&config);
                let shutdown = shutdown.clone();

                tokio::spawn(async move {
                    match serve_connection(stream, handler, config, shutdown).await {
                        Ok(()) => trace!(%remote_addr, "connection closed"),
                        Err(e) => error!(%remote_addr, cause = %e, "connection failed"),
                    }
                });
            }
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::protocol::Request;
    use crate::router::Router;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Hello;

    #[async_trait]
    impl Handler for Hello {
        async fn call(&self, _req: &mut Request) -> Response {
            Response::text("hello from the server")
        }
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let mut router = Router::new();
        router.get("/greet", Hello);

        let opts = ServerOpts { addr: "127.0.0.1:0".to_string(), ..Default::default() };
        let server = Server::serve(opts, router.into_handler()).await.unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /greet HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hello from the server"));

        server.close();
    }

    #[tokio::test]
    async fn close_stops_accepting() {
        let mut router = Router::new();
        router.get("/", Hello);

        let opts = ServerOpts { addr: "127.0.0.1:0".to_string(), ..Default::default() };
        let server = Server::serve(opts, router.into_handler()).await.unwrap();
        let addr = server.local_addr();

        server.close();
        // give the accept loop a moment to observe the cancellation
        tokio::time::sleep(Duration::from_millis(50)).await;

        // a connection may still be accepted by the OS backlog, but the
        // server never serves it: the read returns nothing
        if let Ok(mut stream) = TcpStream::connect(addr).await {
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .ok();
            let mut out = Vec::new();
            let read = tokio::time::timeout(
                Duration::from_millis(200),
                stream.read_to_end(&mut out),
            )
            .await;
            assert!(read.is_err() || out.is_empty());
        }
    }
}
