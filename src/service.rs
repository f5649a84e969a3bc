use crate::future::{DecompressionFuture, ResponseFuture};
use crate::negotiate::{SNAPPY, has_token};
use crate::pool::{DecoderPool, EncoderPool};
use http::{HeaderValue, Request, Response, header};
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that snappy-compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    pool: EncoderPool,
}

impl<S> CompressionService<S> {
    /// Creates a new compression service wrapping the given inner service.
    pub fn new(inner: S, pool: EncoderPool) -> Self {
        Self { inner, pool }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = Response<crate::body::CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let negotiated = has_token(req.headers().get_all(header::ACCEPT_ENCODING));
        tracing::trace!(negotiated, "checked request for snappy support");

        // The inner service must not negotiate an encoding of its own.
        if negotiated {
            req.headers_mut().remove(header::ACCEPT_ENCODING);
        }

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, negotiated.then(|| self.pool.clone()))
    }
}

/// A Tower service that advertises snappy and decompresses snappy responses.
#[derive(Debug, Clone)]
pub struct DecompressionService<S> {
    inner: S,
    pool: DecoderPool,
}

impl<S> DecompressionService<S> {
    /// Creates a new decompression service wrapping the given inner service.
    pub fn new(inner: S, pool: DecoderPool) -> Self {
        Self { inner, pool }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DecompressionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = Response<crate::body::DecompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = DecompressionFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // Overwrites any encodings the caller listed.
        req.headers_mut().insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static(SNAPPY),
        );

        let inner = self.inner.call(req);

        DecompressionFuture::new(inner, self.pool.clone())
    }
}
