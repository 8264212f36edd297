//! Async TCP front end.
//!
//! Accepts connections and feeds HTTP/1.1 requests, one at a time per
//! connection, to a handler (normally [`Gateway::handle`](crate::Gateway::handle)).
//! Persistent connections and pipelined requests are supported. Streamed
//! response bodies are written with chunked transfer coding as they are
//! produced, so a cached response reaches the client at origin pace.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::StatusCode;
use crate::http::request::{Request, RequestError};
use crate::http::response::Response;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body) buffered before answering 413 (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener waiting for a handler.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::server::Server;
/// use rttp_cache::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds to `addr`. Port `0` picks a free port; see
    /// [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves connections with `handler` forever.
    ///
    /// # Errors
    ///
    /// Currently never returns an error; failed accepts are logged and
    /// skipped. The signature leaves room for listener failures.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Serves connections with `handler` until `shutdown` resolves.
    ///
    /// Shutdown stops accepting; connections already open finish on their
    /// own tasks.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "gateway listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "gateway stopped accepting");
                    return Ok(());
                }
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(%peer, "connection accepted");
            let connection = Connection {
                stream,
                peer,
                buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = connection.serve(handler).await {
                    warn!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

// One client connection and the bytes read from it but not yet consumed.
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buf: BytesMut,
}

// What the read loop found in the buffer.
enum Frame {
    Request(Request, usize),
    Rejected(Response),
    Closed,
}

impl Connection {
    // Serves requests until the peer closes, asks to close, or errs. A body
    // stream that fails mid-write leaves the chunked framing unterminated,
    // so that error also ends the connection.
    async fn serve<H, F>(mut self, handler: Arc<H>) -> std::io::Result<()>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        loop {
            let (request, consumed) = match self.next_frame().await? {
                Frame::Request(request, consumed) => (request, consumed),
                Frame::Rejected(response) => {
                    response.write_to(&mut self.stream).await?;
                    return Ok(());
                }
                Frame::Closed => {
                    debug!(peer = %self.peer, "connection closed by peer");
                    return Ok(());
                }
            };

            let keep_alive = request.is_keep_alive();
            debug!(
                peer = %self.peer,
                method = %request.method(),
                path = request.path(),
                "dispatching request"
            );

            let mut response = handler(request).await;
            if !keep_alive {
                response = response.keep_alive(false);
            }
            response.write_to(&mut self.stream).await?;
            let _ = self.buf.split_to(consumed);

            if !keep_alive {
                debug!(peer = %self.peer, "Connection: close");
                return Ok(());
            }
        }
    }

    // Parses whatever is buffered first, so pipelined requests are served
    // without waiting for more input.
    async fn next_frame(&mut self) -> std::io::Result<Frame> {
        loop {
            if !self.buf.is_empty() {
                match Request::parse(&self.buf) {
                    Ok((request, body_offset)) => {
                        let declared = request.content_length().unwrap_or(0);
                        let Some(total) = body_offset
                            .checked_add(declared)
                            .filter(|&total| total <= MAX_REQUEST_SIZE)
                        else {
                            warn!(peer = %self.peer, declared, "declared body too large, sending 413");
                            return Ok(too_large());
                        };
                        if self.buf.len() >= total {
                            // Bounded so pipelined bytes stay out of this body.
                            let (request, _) = Request::parse(&self.buf[..total])
                                .map_err(std::io::Error::other)?;
                            return Ok(Frame::Request(request, total));
                        }
                    }
                    Err(RequestError::Incomplete) => {}
                    Err(e) => {
                        warn!(peer = %self.peer, error = %e, "bad request, sending 400");
                        return Ok(Frame::Rejected(
                            Response::new(StatusCode::BadRequest)
                                .body(format!("Bad Request: {e}"))
                                .keep_alive(false),
                        ));
                    }
                }
            }

            if self.buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %self.peer, "request too large, sending 413");
                return Ok(too_large());
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Ok(Frame::Closed);
            }
        }
    }
}

fn too_large() -> Frame {
    Frame::Rejected(
        Response::new(StatusCode::PayloadTooLarge)
            .body("Request entity too large")
            .keep_alive(false),
    )
}
