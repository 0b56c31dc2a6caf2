use crate::body::CompressionBody;
use crate::codec::Encoding;
use http::header::{self, HeaderMap, HeaderValue};
use http::Response;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

pin_project! {
    /// Response future of [`CompressionService`](crate::CompressionService).
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        encoding: Option<Encoding>,
        min_size: usize,
    }
}

impl<F> ResponseFuture<F> {
    /// `encoding` is `None` when the request may not be compressed at all.
    pub(crate) fn new(inner: F, encoding: Option<Encoding>, min_size: usize) -> Self {
        Self {
            inner,
            encoding,
            min_size,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let response = ready!(this.inner.poll(cx))?;
        Poll::Ready(Ok(apply(response, *this.encoding, *this.min_size)))
    }
}

/// Rewrites `response` to use `encoding` unless its headers rule compression out.
fn apply<B>(
    response: Response<B>,
    encoding: Option<Encoding>,
    min_size: usize,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();

    let Some(encoding) = encoding else {
        return Response::from_parts(parts, CompressionBody::identity(body));
    };

    if let Some(reason) = skip_reason(&parts.headers, min_size) {
        tracing::debug!(reason, "response not compressed");
        return Response::from_parts(parts, CompressionBody::identity(body));
    }

    let flush_each_chunk = wants_streaming(&parts.headers);

    let headers = &mut parts.headers;
    headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static(encoding.as_str()),
    );
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::ACCEPT_RANGES);
    if !varies_on_accept_encoding(headers) {
        headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
    }

    tracing::debug!(
        encoding = encoding.as_str(),
        flush_each_chunk,
        "compressing response"
    );

    Response::from_parts(
        parts,
        CompressionBody::encoded(body, encoding, flush_each_chunk),
    )
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Returns why a response must be sent as is, if it must.
fn skip_reason(headers: &HeaderMap, min_size: usize) -> Option<&'static str> {
    if headers.contains_key(header::CONTENT_ENCODING) {
        return Some("already encoded");
    }
    if headers.contains_key(header::CONTENT_RANGE) {
        return Some("range response");
    }

    if let Some(content_type) = header_str(headers, header::CONTENT_TYPE) {
        if content_type.starts_with("image/") && !content_type.starts_with("image/svg+xml") {
            return Some("image content");
        }
        if content_type.starts_with("application/grpc")
            && !content_type.starts_with("application/grpc-web")
        {
            return Some("grpc content");
        }
    }

    let too_small = header_str(headers, header::CONTENT_LENGTH)
        .and_then(|len| len.parse::<usize>().ok())
        .is_some_and(|len| len < min_size);
    if too_small {
        return Some("below minimum size");
    }

    None
}

/// Streaming responses get the encoder flushed after every chunk.
fn wants_streaming(headers: &HeaderMap) -> bool {
    let unbuffered = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));

    unbuffered
        || header_str(headers, header::CONTENT_TYPE).is_some_and(|ct| {
            ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
        })
}

fn varies_on_accept_encoding(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|v| v == "*" || v.eq_ignore_ascii_case("accept-encoding"))
}
