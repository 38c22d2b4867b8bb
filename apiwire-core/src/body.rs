//! Message body types.
//!
//! [`Body`] is the HTTP body used by both the dispatcher and the client.
//! [`BodyStream`] is the value a byte-stream body field holds: an owned,
//! readable handle on the remaining body bytes.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http_body::Body as _;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited, StreamBody};
use pin_project_lite::pin_project;

use crate::{BoxError, WireError};

pin_project! {
    /// An HTTP message body.
    ///
    /// This type can represent:
    /// - Empty bodies
    /// - Full bodies with the complete message in memory
    /// - Boxed bodies wrapping any other body, e.g. a stream or an incoming connection
    #[project = BodyProj]
    pub enum Body {
        Empty,
        Full {
            data: Option<Bytes>,
        },
        Boxed {
            #[pin]
            inner: UnsyncBoxBody<Bytes, BoxError>,
        },
    }
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn full(data: impl Into<Bytes>) -> Self {
        Body::Full {
            data: Some(data.into()),
        }
    }

    /// Wrap any body whose frames carry `Bytes`.
    pub fn new<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Body::Boxed {
            inner: body.map_err(Into::into).boxed_unsync(),
        }
    }

    /// Create a body from a stream of chunks.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Body::new(StreamBody::new(stream.map_ok(Frame::data)))
    }

    /// Read the whole body, failing once more than `limit` bytes arrive.
    pub async fn collect_limited(self, limit: Option<usize>) -> Result<Bytes, WireError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full { data } => {
                let data = data.unwrap_or_default();
                match limit {
                    Some(limit) if data.len() > limit => Err(WireError::TooLarge { limit }),
                    _ => Ok(data),
                }
            }
            Body::Boxed { inner } => match limit {
                Some(limit) => {
                    let collect: futures::future::BoxFuture<'static, _> =
                        Box::pin(Limited::new(inner, limit).collect());
                    collect
                        .await
                    .map(|collected| collected.to_bytes())
                    .map_err(|e| {
                        if e.is::<LengthLimitError>() {
                            WireError::TooLarge { limit }
                        } else {
                            WireError::Body(e.to_string())
                        }
                    })
                }
                None => inner
                    .collect()
                    .await
                    .map(|collected| collected.to_bytes())
                    .map_err(|e| WireError::Body(e.to_string())),
            },
        }
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            BodyProj::Empty => Poll::Ready(None),
            BodyProj::Full { data } => Poll::Ready(data.take().map(|d| Ok(Frame::data(d)))),
            BodyProj::Boxed { inner } => inner.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full { data } => data.is_none(),
            Body::Boxed { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Body::Empty => http_body::SizeHint::with_exact(0),
            Body::Full { data } => {
                http_body::SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64))
            }
            Body::Boxed { inner } => inner.size_hint(),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Body::full(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Body::full(data)
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Body::full(data)
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Full { data } => f
                .debug_struct("Body::Full")
                .field("data_len", &data.as_ref().map(|d| d.len()))
                .finish(),
            Body::Boxed { .. } => write!(f, "Body::Boxed"),
        }
    }
}

/// An owned byte stream carried by a message field.
///
/// Whoever holds the value is responsible for it: reading it to the end, or
/// dropping it, which releases the underlying connection. The codec never
/// buffers a stream field; bytes flow straight between the connection and
/// the holder.
#[derive(Default)]
pub struct BodyStream {
    body: Body,
}

impl BodyStream {
    pub fn new(body: Body) -> Self {
        Self { body }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Body::full(data))
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::new(Body::from_stream(stream))
    }

    /// Read the remaining bytes into memory.
    pub async fn bytes(self) -> Result<Bytes, BoxError> {
        Ok(self.body.collect().await?.to_bytes())
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match Pin::new(&mut self.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => frame,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            // trailers are skipped
            if let Ok(data) = frame.into_data() {
                return Poll::Ready(Some(Ok(data)));
            }
        }
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BodyStream").field(&self.body).finish()
    }
}
