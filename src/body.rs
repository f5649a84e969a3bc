use crate::codec::{SnappyDecoder, SnappyEncoder};
use crate::pool::Pooled;
use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that may be snappy-compressed.
    ///
    /// This type wraps an inner body and either compresses it with a pooled
    /// encoder or passes it through unchanged.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Compressed body with encoder.
        Compressed {
            // Declared before `state` so the inner body is dropped before the
            // encoder goes back to its pool.
            #[pin]
            inner: B,
            state: CompressedBody,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

/// State for an actively compressed body.
pub(crate) struct CompressedBody {
    encoder: Option<Pooled<SnappyEncoder>>,
    output: BytesMut,
    always_flush: bool,
    state: StreamState,
    pending_trailers: Option<HeaderMap>,
}

/// Shared state machine for both transcoding directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// Reading frames from the inner body.
    Reading,
    /// Emitting buffered trailers.
    Trailers,
    /// The stream is complete and the codec has been released.
    Done,
}

impl CompressedBody {
    fn new(encoder: Pooled<SnappyEncoder>, always_flush: bool) -> Self {
        Self {
            encoder: Some(encoder),
            output: BytesMut::new(),
            always_flush,
            state: StreamState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current stream state.
    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    /// Returns whether every data frame is flushed through the encoder.
    #[cfg(test)]
    pub(crate) fn always_flush(&self) -> bool {
        self.always_flush
    }

    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                StreamState::Done => return Poll::Ready(None),

                StreamState::Trailers => {
                    self.state = StreamState::Done;
                    let trailers = self.pending_trailers.take();
                    return Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t))));
                }

                StreamState::Reading => {
                    let Some(encoder) = self.encoder.as_mut() else {
                        self.state = StreamState::Done;
                        continue;
                    };

                    let frame = match inner.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            if let Some(data) = self.finish() {
                                return Poll::Ready(Some(Ok(Frame::data(data))));
                            }
                            continue;
                        }
                        Poll::Ready(Some(Err(e))) => {
                            self.release();
                            return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                        }
                        Poll::Ready(Some(Ok(frame))) => frame,
                    };

                    let mut data = match frame.into_data() {
                        Ok(data) => data,
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                self.pending_trailers = Some(trailers);
                                if let Some(data) = self.finish() {
                                    return Poll::Ready(Some(Ok(Frame::data(data))));
                                }
                            }
                            continue;
                        }
                    };

                    // An empty data frame is an explicit flush request.
                    let flush = self.always_flush || !data.has_remaining();
                    let mut result = Ok(());
                    while data.has_remaining() && result.is_ok() {
                        let chunk = data.chunk();
                        let len = chunk.len();
                        result = encoder.encode(chunk, &mut self.output);
                        data.advance(len);
                    }
                    if flush && result.is_ok() {
                        result = encoder.flush(&mut self.output);
                    }

                    if let Err(e) = result {
                        self.release();
                        return Poll::Ready(Some(Err(e.into())));
                    }

                    if !self.output.is_empty() {
                        let data = self.output.split().freeze();
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                    // Input was buffered by the encoder, keep reading.
                }
            }
        }
    }

    /// Finishes the encoder and returns it to its pool.
    ///
    /// Returns the final compressed bytes, if any.
    fn finish(&mut self) -> Option<Bytes> {
        if let Some(encoder) = self.encoder.as_mut() {
            if let Err(error) = encoder.finish(&mut self.output) {
                tracing::warn!(%error, "failed to finish snappy stream");
            }
        }
        self.encoder = None;
        self.state = if self.pending_trailers.is_some() {
            StreamState::Trailers
        } else {
            StreamState::Done
        };

        if self.output.is_empty() {
            None
        } else {
            Some(self.output.split().freeze())
        }
    }

    fn release(&mut self) {
        self.encoder = None;
        self.pending_trailers = None;
        self.state = StreamState::Done;
    }
}

impl<B> CompressionBody<B> {
    /// Creates a body compressed with a checked-out encoder.
    pub fn compressed(inner: B, encoder: Pooled<SnappyEncoder>, always_flush: bool) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(encoder, always_flush),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }

    /// Returns whether this body is being compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed { .. })
    }
}

impl<B> fmt::Debug for CompressionBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionBody::Compressed { state, .. } => f
                .debug_struct("CompressionBody::Compressed")
                .field("state", &state.state)
                .field("always_flush", &state.always_flush)
                .finish_non_exhaustive(),
            CompressionBody::Passthrough { .. } => f
                .debug_struct("CompressionBody::Passthrough")
                .finish_non_exhaustive(),
        }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => poll_passthrough(inner, cx),
            CompressionBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Compressed { state, .. } => state.state() == StreamState::Done,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            // Compressed size is unknown
            CompressionBody::Compressed { .. } => http_body::SizeHint::default(),
        }
    }
}

pin_project! {
    /// A response body that may be snappy-decompressed.
    ///
    /// This type wraps an upstream body and either decodes it with a pooled
    /// decoder or passes it through unchanged.
    #[project = DecompressionBodyProj]
    #[allow(missing_docs)]
    pub enum DecompressionBody<B> {
        /// Decompressed body with decoder.
        Decompressed {
            // Declared before `state` so the upstream body is closed before
            // the decoder goes back to its pool.
            #[pin]
            inner: B,
            state: DecompressedBody,
        },
        /// Passthrough body without decompression.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

/// State for an actively decompressed body.
pub(crate) struct DecompressedBody {
    decoder: Option<Pooled<SnappyDecoder>>,
    state: StreamState,
    pending_trailers: Option<HeaderMap>,
}

impl DecompressedBody {
    fn new(decoder: Pooled<SnappyDecoder>) -> Self {
        Self {
            decoder: Some(decoder),
            state: StreamState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current stream state.
    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    fn poll_decompressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                StreamState::Done => return Poll::Ready(None),

                StreamState::Trailers => {
                    self.state = StreamState::Done;
                    let trailers = self.pending_trailers.take();
                    return Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t))));
                }

                StreamState::Reading => {
                    let Some(decoder) = self.decoder.as_mut() else {
                        self.state = StreamState::Done;
                        continue;
                    };

                    match decoder.decode() {
                        Ok(Some(data)) => return Poll::Ready(Some(Ok(Frame::data(data)))),
                        Ok(None) => {}
                        Err(e) => {
                            self.release();
                            return Poll::Ready(Some(Err(e.into())));
                        }
                    }

                    let frame = match inner.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            if let Err(e) = self.finish() {
                                return Poll::Ready(Some(Err(e)));
                            }
                            continue;
                        }
                        Poll::Ready(Some(Err(e))) => {
                            self.release();
                            return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                        }
                        Poll::Ready(Some(Ok(frame))) => frame,
                    };

                    match frame.into_data() {
                        Ok(mut data) => {
                            while data.has_remaining() {
                                let chunk = data.chunk();
                                let len = chunk.len();
                                decoder.push(chunk);
                                data.advance(len);
                            }
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                self.pending_trailers = Some(trailers);
                                if let Err(e) = self.finish() {
                                    return Poll::Ready(Some(Err(e)));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Checks the stream ended cleanly and returns the decoder to its pool.
    fn finish(&mut self) -> Result<(), io::Error> {
        let result = match self.decoder.as_ref() {
            Some(decoder) => decoder.finish(),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.release();
            return Err(e.into());
        }

        self.decoder = None;
        self.state = if self.pending_trailers.is_some() {
            StreamState::Trailers
        } else {
            StreamState::Done
        };
        Ok(())
    }

    fn release(&mut self) {
        self.decoder = None;
        self.pending_trailers = None;
        self.state = StreamState::Done;
    }
}

impl<B> DecompressionBody<B> {
    /// Creates a body decoded with a checked-out decoder.
    pub fn decompressed(inner: B, decoder: Pooled<SnappyDecoder>) -> Self {
        Self::Decompressed {
            inner,
            state: DecompressedBody::new(decoder),
        }
    }

    /// Creates a passthrough body without decompression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }

    /// Returns whether this body is being decompressed.
    pub fn is_decompressed(&self) -> bool {
        matches!(self, Self::Decompressed { .. })
    }
}

impl<B> fmt::Debug for DecompressionBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecompressionBody::Decompressed { state, .. } => f
                .debug_struct("DecompressionBody::Decompressed")
                .field("state", &state.state)
                .finish_non_exhaustive(),
            DecompressionBody::Passthrough { .. } => f
                .debug_struct("DecompressionBody::Passthrough")
                .finish_non_exhaustive(),
        }
    }
}

impl<B> Body for DecompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            DecompressionBodyProj::Passthrough { inner } => poll_passthrough(inner, cx),
            DecompressionBodyProj::Decompressed { inner, state } => {
                state.poll_decompressed(cx, inner)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            DecompressionBody::Passthrough { inner } => inner.is_end_stream(),
            DecompressionBody::Decompressed { state, .. } => state.state() == StreamState::Done,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            DecompressionBody::Passthrough { inner } => inner.size_hint(),
            // Decompressed size is unknown
            DecompressionBody::Decompressed { .. } => http_body::SizeHint::default(),
        }
    }
}

/// Passes frames through, converting data to `Bytes`.
fn poll_passthrough<B>(
    inner: Pin<&mut B>,
    cx: &mut Context<'_>,
) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match inner.poll_frame(cx) {
        Poll::Pending => Poll::Pending,
        Poll::Ready(None) => Poll::Ready(None),
        Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(
            frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))
        ))),
        Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
    }
}
