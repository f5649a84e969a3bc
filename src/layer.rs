use crate::pool::{DecoderPool, EncoderPool};
use crate::service::{CompressionService, DecompressionService};
use tower::Layer;

/// A Tower layer that snappy-compresses HTTP response bodies.
///
/// This layer wraps request handlers and compresses response bodies when the
/// client's `Accept-Encoding` header lists `snappy`. Every service produced by
/// one layer shares the same encoder pool.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    pool: EncoderPool,
}

impl CompressionLayer {
    /// Creates a new compression layer with a fresh, unbounded encoder pool.
    pub fn new() -> Self {
        Self {
            pool: EncoderPool::default(),
        }
    }

    /// Uses the given encoder pool instead of the layer's own.
    pub fn pool(mut self, pool: EncoderPool) -> Self {
        self.pool = pool;
        self
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, self.pool.clone())
    }
}

/// A Tower layer that decompresses snappy-encoded HTTP response bodies.
///
/// This layer wraps request-issuing services, advertises `snappy` in every
/// request's `Accept-Encoding` header and decodes responses that declare it.
#[derive(Debug, Clone)]
pub struct DecompressionLayer {
    pool: DecoderPool,
}

impl DecompressionLayer {
    /// Creates a new decompression layer with a fresh, unbounded decoder pool.
    pub fn new() -> Self {
        Self {
            pool: DecoderPool::default(),
        }
    }

    /// Uses the given decoder pool instead of the layer's own.
    pub fn pool(mut self, pool: DecoderPool) -> Self {
        self.pool = pool;
        self
    }
}

impl Default for DecompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for DecompressionLayer {
    type Service = DecompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DecompressionService::new(inner, self.pool.clone())
    }
}
