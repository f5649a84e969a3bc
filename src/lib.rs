//! Snappy content-encoding middleware for Tower.
//!
//! This crate provides a pair of Tower layers that transparently apply the
//! `snappy` content encoding (the snappy framing format) to HTTP bodies:
//!
//! - [`CompressionLayer`] wraps a server-side handler and compresses response
//!   bodies for requests whose `Accept-Encoding` lists `snappy`.
//! - [`DecompressionLayer`] wraps a client-side service, advertises `snappy`
//!   on every request and decompresses responses that declare it.
//!
//! # Example
//!
//! ```ignore
//! use http_snappy::{CompressionLayer, DecompressionLayer};
//! use tower::ServiceBuilder;
//!
//! let server = ServiceBuilder::new()
//!     .layer(CompressionLayer::new())
//!     .service(my_handler);
//!
//! let client = ServiceBuilder::new()
//!     .layer(DecompressionLayer::new())
//!     .service(my_client);
//! ```
//!
//! # Server Rules
//!
//! - `Vary: Accept-Encoding` is always added, compressed or not
//! - `Accept-Encoding` is removed from negotiated requests before the handler
//!   sees them
//! - `101 Switching Protocols` responses and responses that already carry a
//!   `Content-Encoding` are left untouched
//! - `Content-Length` and `Accept-Ranges` are removed from compressed responses
//!
//! The encoder buffers up to one 64 KiB block. It **flushes** after each
//! data frame when:
//! - `X-Accel-Buffering: no` header is present
//! - `Content-Type` is `text/event-stream`
//! - `Content-Type` starts with `application/grpc-web`
//!
//! and whenever the handler yields an empty data frame.
//!
//! # Pooling
//!
//! Encoder and decoder state is kept in [`Pool`]s owned by the layers and
//! shared by every service they produce. A checked-out [`Pooled`] instance is
//! returned when its body finishes, fails, or is dropped. Pass your own pool
//! with [`CompressionLayer::pool`] or [`DecompressionLayer::pool`] to share it
//! further or bound it with [`Pool::with_max_idle`].

#![deny(missing_docs)]

mod body;
mod codec;
mod future;
mod layer;
mod negotiate;
mod pool;
mod service;

pub use body::{CompressionBody, DecompressionBody};
pub use codec::{CodecError, SnappyDecoder, SnappyEncoder};
pub use future::{DecompressionFuture, ResponseFuture};
pub use layer::{CompressionLayer, DecompressionLayer};
pub use negotiate::{SNAPPY, has_token};
pub use pool::{DecoderPool, EncoderPool, Pool, Pooled, Reset};
pub use service::{CompressionService, DecompressionService};
