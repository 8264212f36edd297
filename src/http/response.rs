//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! writing them to any [`AsyncWrite`] sink. Full bodies go out with a
//! `Content-Length` header; streamed bodies with `Transfer-Encoding: chunked`.

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Body, Headers, StatusCode};

/// An HTTP/1.1 response, ready to be written to a connection.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Response, StatusCode};
///
/// # #[tokio::main]
/// # async fn main() {
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let mut wire = Vec::new();
/// response.write_to(&mut wire).await.unwrap();
/// let text = String::from_utf8(wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::empty(),
            keep_alive: true,
        }
    }

    /// Creates a response whose body is `value` serialized as JSON.
    ///
    /// Sets `Content-Type: application/json`.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status)
            .header("Content-Type", "application/json")
            .body(value.to_string())
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Sets a streamed (or otherwise prepared) body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a reference to the body.
    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// Consumes the response and returns its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Replaces the body with `f(body)`, leaving status and headers untouched.
    #[must_use]
    pub fn map_body(mut self, f: impl FnOnce(Body) -> Body) -> Self {
        let body = std::mem::take(&mut self.body);
        self.body = f(body);
        self
    }

    /// Writes the response in HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body may be non-empty
    ///   and no `Content-Type` header was set.
    /// - `Content-Length: <n>` for full bodies, `Transfer-Encoding: chunked`
    ///   for streamed ones.
    /// - `Connection: keep-alive` or `Connection: close`.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error from `writer`. A body stream error is
    /// reported as [`std::io::ErrorKind::Other`] after the chunks already
    /// produced have been written; the chunked terminator is not sent, so the
    /// peer sees a truncated message.
    pub async fn write_to<W>(mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let body = std::mem::take(&mut self.body);
        let mut head = BytesMut::with_capacity(128 + self.headers.len() * 64);

        match body {
            Body::Full(bytes) => {
                self.encode_head(&mut head, !bytes.is_empty());
                head.put(format!("Content-Length: {}\r\n\r\n", bytes.len()).as_bytes());
                head.put(bytes);
                writer.write_all(&head).await?;
            }
            Body::Stream(mut chunks) => {
                self.encode_head(&mut head, true);
                head.put(&b"Transfer-Encoding: chunked\r\n\r\n"[..]);
                writer.write_all(&head).await?;

                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk.map_err(std::io::Error::other)?;
                    // A zero-length frame would terminate the message early.
                    if chunk.is_empty() {
                        continue;
                    }
                    writer
                        .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                        .await?;
                    writer.write_all(&chunk).await?;
                    writer.write_all(b"\r\n").await?;
                }
                writer.write_all(b"0\r\n\r\n").await?;
            }
        }

        writer.flush().await
    }

    // Status line and headers, without the framing header or the blank line.
    fn encode_head(&mut self, buf: &mut BytesMut, has_body: bool) {
        if has_body && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.insert("Connection", connection);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
