//! Response bodies: either fully buffered or a finite stream of chunks.
//!
//! A [`Body::Full`] is written with a `Content-Length` header. A
//! [`Body::Stream`] is written with `Transfer-Encoding: chunked`, one frame per
//! chunk, in the order the stream yields them.

use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use thiserror::Error;

/// Error raised by a body stream while it is being produced.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("I/O error while producing body: {0}")]
    Io(#[from] std::io::Error),

    #[error("body stream aborted: {0}")]
    Aborted(String),
}

/// A boxed, `Send` stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>;

/// An HTTP response body.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::Body;
///
/// # #[tokio::main]
/// # async fn main() {
/// let body = Body::from_chunks(vec!["{\"id\":", "1}"]);
/// assert_eq!(body.collect().await.unwrap(), "{\"id\":1}");
/// # }
/// ```
pub enum Body {
    /// A complete, in-memory body.
    Full(Bytes),
    /// A finite, ordered sequence of chunks.
    Stream(BodyStream),
}

impl Body {
    /// Creates an empty full body.
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    /// Creates a streamed body that yields `chunks` in order.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes, BodyError>> =
            chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::Stream(Box::pin(stream::iter(chunks)))
    }

    /// Wraps an arbitrary chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    /// Returns `true` if this body is streamed rather than fully buffered.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns the buffered bytes of a full body, or `None` for a stream.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Full(bytes) => Some(bytes),
            Self::Stream(_) => None,
        }
    }

    /// Drains the body into one contiguous buffer.
    ///
    /// # Errors
    ///
    /// Returns the first [`BodyError`] yielded by a streamed body.
    pub async fn collect(self) -> Result<Bytes, BodyError> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut chunks) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Full(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Full(Bytes::from_static(text.as_bytes()))
    }
}
