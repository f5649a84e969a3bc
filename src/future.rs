use crate::body::{CompressionBody, DecompressionBody};
use crate::negotiate::{SNAPPY, has_token};
use crate::pool::{DecoderPool, EncoderPool};
use http::{Response, StatusCode, header, response};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        // Set only when the request negotiated snappy.
        pool: Option<EncoderPool>,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(inner: F, pool: Option<EncoderPool>) -> Self {
        Self { inner, pool }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => {
                let response = wrap_response(response, this.pool.as_ref());
                Poll::Ready(Ok(response))
            }
        }
    }
}

pin_project! {
    /// Future for decompression service responses.
    pub struct DecompressionFuture<F> {
        #[pin]
        inner: F,
        pool: DecoderPool,
    }
}

impl<F> DecompressionFuture<F> {
    pub(crate) fn new(inner: F, pool: DecoderPool) -> Self {
        Self { inner, pool }
    }
}

impl<F, B, E> Future for DecompressionFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<DecompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => Poll::Ready(Ok(unwrap_response(response, this.pool))),
        }
    }
}

/// Optional capabilities of the response a handler produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Capabilities {
    /// Each data frame must reach the transport as soon as it is produced.
    flush: bool,
    /// The connection is handed over to the handler.
    upgrade: bool,
    /// The handler already applied its own content encoding.
    encoded: bool,
}

impl Capabilities {
    fn probe(parts: &response::Parts) -> Self {
        let flush = parts
            .headers
            .get("x-accel-buffering")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("no"))
            || is_streaming_content_type(&parts.headers);

        Self {
            flush,
            upgrade: parts.status == StatusCode::SWITCHING_PROTOCOLS,
            encoded: parts.headers.contains_key(header::CONTENT_ENCODING),
        }
    }
}

/// Wraps the response body with compression if the request negotiated it.
fn wrap_response<B>(
    response: Response<B>,
    pool: Option<&EncoderPool>,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();

    add_vary_accept_encoding(&mut parts.headers);

    let Some(pool) = pool else {
        return Response::from_parts(parts, CompressionBody::passthrough(body));
    };

    let capabilities = Capabilities::probe(&parts);
    if capabilities.upgrade || capabilities.encoded {
        tracing::debug!(
            status = %parts.status,
            upgrade = capabilities.upgrade,
            encoded = capabilities.encoded,
            "leaving negotiated response uncompressed"
        );
        return Response::from_parts(parts, CompressionBody::passthrough(body));
    }

    parts.headers.insert(
        header::CONTENT_ENCODING,
        header::HeaderValue::from_static(SNAPPY),
    );

    // Remove Content-Length since compressed size is unknown
    parts.headers.remove(header::CONTENT_LENGTH);

    // Byte ranges would refer to the uncompressed representation
    parts.headers.remove(header::ACCEPT_RANGES);

    let body = CompressionBody::compressed(body, pool.checkout(), capabilities.flush);
    Response::from_parts(parts, body)
}

/// Wraps the response body with decompression if it declares snappy.
fn unwrap_response<B>(response: Response<B>, pool: &DecoderPool) -> Response<DecompressionBody<B>> {
    let (mut parts, body) = response.into_parts();

    if !has_token(parts.headers.get_all(header::CONTENT_ENCODING)) {
        return Response::from_parts(parts, DecompressionBody::passthrough(body));
    }

    tracing::trace!("decoding snappy response body");

    // Content-Length describes the encoded bytes
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, DecompressionBody::decompressed(body, pool.checkout()))
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut header::HeaderMap) {
    let listed = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|vary| vary.to_str().ok())
        .flat_map(|vary| vary.split(','))
        .map(str::trim)
        .any(|v| v == "*" || v.eq_ignore_ascii_case("accept-encoding"));
    if listed {
        return;
    }

    headers.append(
        header::VARY,
        header::HeaderValue::from_static("Accept-Encoding"),
    );
}

/// Checks if the content type requires always flushing (e.g., streaming).
fn is_streaming_content_type(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
        })
}
