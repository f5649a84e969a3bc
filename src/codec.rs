//! Streaming codec for the snappy framing format.
//!
//! Blocks are compressed with [`snap::raw`], and framed as a sequence of
//! chunks: a stream identifier, then compressed or uncompressed chunks of at
//! most 64 KiB of input each, every one carrying a masked CRC-32C of its
//! uncompressed bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;

use crate::pool::Reset;

/// Maximum number of uncompressed bytes in one chunk.
const MAX_BLOCK_SIZE: usize = 65536;

/// `snap::raw::max_compress_len(MAX_BLOCK_SIZE)`.
const MAX_ENCODED_BLOCK_SIZE: usize = 76490;

const CHUNK_HEADER_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;

const CHUNK_COMPRESSED: u8 = 0x00;
const CHUNK_UNCOMPRESSED: u8 = 0x01;
const CHUNK_PADDING: u8 = 0xfe;
const CHUNK_STREAM_IDENTIFIER: u8 = 0xff;

const STREAM_MAGIC: &[u8] = b"sNaPpY";
const STREAM_IDENTIFIER: &[u8] = b"\xff\x06\x00\x00sNaPpY";

/// Errors produced while encoding or decoding a snappy stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The block compressor rejected its input.
    #[error("snappy block error: {0}")]
    Block(#[from] snap::Error),
    /// The stream did not start with a stream identifier chunk.
    #[error("snappy stream does not start with a stream identifier")]
    MissingStreamIdentifier,
    /// A stream identifier chunk carried the wrong magic bytes.
    #[error("invalid snappy stream identifier")]
    InvalidStreamIdentifier,
    /// A chunk declared a length outside the bounds for its type.
    #[error("snappy chunk of type {kind:#04x} has invalid length {len}")]
    InvalidChunkLength {
        /// Chunk type byte.
        kind: u8,
        /// Declared chunk length.
        len: usize,
    },
    /// A reserved chunk type that must not be skipped.
    #[error("unsupported snappy chunk type {0:#04x}")]
    UnsupportedChunk(u8),
    /// The decoded data did not match the chunk checksum.
    #[error("snappy chunk checksum mismatch")]
    ChecksumMismatch,
    /// The input ended in the middle of a chunk.
    #[error("snappy stream ended inside a chunk")]
    UnexpectedEof,
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        let kind = match err {
            CodecError::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Masked CRC-32C as used by the framing format.
fn masked_crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
        .rotate_right(15)
        .wrapping_add(0xa282_ead8)
}

/// Push-style encoder for the snappy framing format.
///
/// Input is buffered until a full block is available; [`flush`](Self::flush)
/// emits a partial block early. The encoder owns its block compressor and
/// scratch buffers so that a pooled instance can be reused across streams
/// after a [`reset`](Reset::reset).
pub struct SnappyEncoder {
    raw: snap::raw::Encoder,
    pending: Vec<u8>,
    scratch: Vec<u8>,
    wrote_identifier: bool,
}

impl SnappyEncoder {
    /// Creates an encoder with empty buffers.
    pub fn new() -> Self {
        Self {
            raw: snap::raw::Encoder::new(),
            pending: Vec::with_capacity(MAX_BLOCK_SIZE),
            scratch: Vec::new(),
            wrote_identifier: false,
        }
    }

    /// Encodes `input`, appending every completed chunk to `output`.
    ///
    /// Bytes that do not fill a whole block stay buffered until more input
    /// arrives or the encoder is flushed.
    pub fn encode(&mut self, mut input: &[u8], output: &mut BytesMut) -> Result<(), CodecError> {
        while !input.is_empty() {
            if self.pending.is_empty() && input.len() >= MAX_BLOCK_SIZE {
                let (block, rest) = input.split_at(MAX_BLOCK_SIZE);
                self.write_chunk(block, output)?;
                input = rest;
                continue;
            }

            let take = (MAX_BLOCK_SIZE - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];

            if self.pending.len() == MAX_BLOCK_SIZE {
                self.write_pending(output)?;
            }
        }
        Ok(())
    }

    /// Emits the buffered partial block, if any, without ending the stream.
    pub fn flush(&mut self, output: &mut BytesMut) -> Result<(), CodecError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.write_pending(output)
    }

    /// Finishes the stream.
    ///
    /// The framing format has no trailer, so this drains the final block.
    pub fn finish(&mut self, output: &mut BytesMut) -> Result<(), CodecError> {
        self.flush(output)
    }

    /// Returns the number of input bytes buffered and not yet emitted.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn write_pending(&mut self, output: &mut BytesMut) -> Result<(), CodecError> {
        let mut pending = std::mem::take(&mut self.pending);
        let result = self.write_chunk(&pending, output);
        pending.clear();
        self.pending = pending;
        result
    }

    fn write_chunk(&mut self, block: &[u8], output: &mut BytesMut) -> Result<(), CodecError> {
        debug_assert!(!block.is_empty() && block.len() <= MAX_BLOCK_SIZE);

        if !self.wrote_identifier {
            output.extend_from_slice(STREAM_IDENTIFIER);
            self.wrote_identifier = true;
        }

        let checksum = masked_crc32c(block);
        self.scratch.resize(snap::raw::max_compress_len(block.len()), 0);
        let compressed_len = self.raw.compress(block, &mut self.scratch)?;

        // Store blocks that compress by less than 12.5% as-is.
        let (kind, body) = if compressed_len >= block.len() - block.len() / 8 {
            (CHUNK_UNCOMPRESSED, block)
        } else {
            (CHUNK_COMPRESSED, &self.scratch[..compressed_len])
        };

        let chunk_len = CHECKSUM_SIZE + body.len();
        output.reserve(CHUNK_HEADER_SIZE + chunk_len);
        output.put_u8(kind);
        output.put_uint_le(chunk_len as u64, 3);
        output.put_u32_le(checksum);
        output.extend_from_slice(body);
        Ok(())
    }
}

impl Default for SnappyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Reset for SnappyEncoder {
    fn reset(&mut self) {
        self.pending.clear();
        self.wrote_identifier = false;
    }
}

/// Pull-style decoder for the snappy framing format.
///
/// Encoded bytes are [`push`](Self::push)ed in as they arrive, and
/// [`decode`](Self::decode) yields the content of each complete chunk.
pub struct SnappyDecoder {
    raw: snap::raw::Decoder,
    input: BytesMut,
    scratch: Vec<u8>,
    read_identifier: bool,
}

impl SnappyDecoder {
    /// Creates a decoder with empty buffers.
    pub fn new() -> Self {
        Self {
            raw: snap::raw::Decoder::new(),
            input: BytesMut::new(),
            scratch: Vec::new(),
            read_identifier: false,
        }
    }

    /// Buffers encoded bytes for decoding.
    pub fn push(&mut self, data: &[u8]) {
        self.input.extend_from_slice(data);
    }

    /// Decodes the next chunk from the buffered input.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete data
    /// chunk. Padding and skippable chunks are consumed silently.
    pub fn decode(&mut self) -> Result<Option<Bytes>, CodecError> {
        loop {
            if self.input.len() < CHUNK_HEADER_SIZE {
                return Ok(None);
            }

            let kind = self.input[0];
            let len = usize::from(self.input[1])
                | usize::from(self.input[2]) << 8
                | usize::from(self.input[3]) << 16;

            if !self.read_identifier && kind != CHUNK_STREAM_IDENTIFIER {
                return Err(CodecError::MissingStreamIdentifier);
            }
            check_chunk_len(kind, len)?;

            if self.input.len() < CHUNK_HEADER_SIZE + len {
                return Ok(None);
            }
            self.input.advance(CHUNK_HEADER_SIZE);
            let mut chunk = self.input.split_to(len);

            match kind {
                CHUNK_STREAM_IDENTIFIER => {
                    if &chunk[..] != STREAM_MAGIC {
                        return Err(CodecError::InvalidStreamIdentifier);
                    }
                    self.read_identifier = true;
                }
                CHUNK_COMPRESSED => {
                    let checksum = chunk.get_u32_le();
                    let decoded_len = snap::raw::decompress_len(&chunk)?;
                    if decoded_len > MAX_BLOCK_SIZE {
                        return Err(CodecError::InvalidChunkLength {
                            kind,
                            len: decoded_len,
                        });
                    }
                    self.scratch.resize(decoded_len, 0);
                    let n = self.raw.decompress(&chunk, &mut self.scratch)?;
                    let decoded = &self.scratch[..n];
                    if masked_crc32c(decoded) != checksum {
                        return Err(CodecError::ChecksumMismatch);
                    }
                    if !decoded.is_empty() {
                        return Ok(Some(Bytes::copy_from_slice(decoded)));
                    }
                }
                CHUNK_UNCOMPRESSED => {
                    let checksum = chunk.get_u32_le();
                    if masked_crc32c(&chunk) != checksum {
                        return Err(CodecError::ChecksumMismatch);
                    }
                    if !chunk.is_empty() {
                        return Ok(Some(chunk.freeze()));
                    }
                }
                // Padding and reserved skippable chunks.
                _ => {}
            }
        }
    }

    /// Checks that the stream ended on a chunk boundary.
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(CodecError::UnexpectedEof)
        }
    }
}

impl Default for SnappyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Reset for SnappyDecoder {
    fn reset(&mut self) {
        self.input.clear();
        self.read_identifier = false;
    }
}

fn check_chunk_len(kind: u8, len: usize) -> Result<(), CodecError> {
    let valid = match kind {
        CHUNK_STREAM_IDENTIFIER => len == STREAM_MAGIC.len(),
        CHUNK_COMPRESSED => (CHECKSUM_SIZE..=CHECKSUM_SIZE + MAX_ENCODED_BLOCK_SIZE).contains(&len),
        CHUNK_UNCOMPRESSED => (CHECKSUM_SIZE..=CHECKSUM_SIZE + MAX_BLOCK_SIZE).contains(&len),
        0x02..=0x7f => return Err(CodecError::UnsupportedChunk(kind)),
        // 0x80..=0xfd skippable, CHUNK_PADDING
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(CodecError::InvalidChunkLength { kind, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn encode_all(input: &[u8]) -> Bytes {
        let mut encoder = SnappyEncoder::new();
        let mut output = BytesMut::new();
        encoder.encode(input, &mut output).unwrap();
        encoder.finish(&mut output).unwrap();
        output.freeze()
    }

    fn decode_all(input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = SnappyDecoder::new();
        decoder.push(input);
        let mut decoded = Vec::new();
        while let Some(chunk) = decoder.decode()? {
            decoded.extend_from_slice(&chunk);
        }
        decoder.finish()?;
        Ok(decoded)
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(7).fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_empty_stream_produces_no_bytes() {
        assert!(encode_all(b"").is_empty());
        assert_eq!(decode_all(b"").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_stream_starts_with_identifier() {
        let encoded = encode_all(b"hello world");
        assert_eq!(&encoded[..STREAM_IDENTIFIER.len()], STREAM_IDENTIFIER);
    }

    #[test]
    fn test_zeroes_compress() {
        let input = vec![0u8; 65536];
        let encoded = encode_all(&input);
        assert!(encoded.len() < input.len() / 10);
        assert_eq!(encoded[STREAM_IDENTIFIER.len()], CHUNK_COMPRESSED);
        assert_eq!(decode_all(&encoded).unwrap(), input);
    }

    #[test]
    fn test_incompressible_data_is_stored() {
        let input = random_bytes(1000);
        let encoded = encode_all(&input);
        let chunk = &encoded[STREAM_IDENTIFIER.len()..];
        assert_eq!(chunk[0], CHUNK_UNCOMPRESSED);
        assert_eq!(&chunk[CHUNK_HEADER_SIZE + CHECKSUM_SIZE..], &input[..]);
        assert_eq!(decode_all(&encoded).unwrap(), input);
    }

    #[test]
    fn test_large_input_spans_blocks() {
        let mut input = random_bytes(MAX_BLOCK_SIZE * 2 + 123);
        input[..MAX_BLOCK_SIZE].fill(b'a');
        assert_eq!(decode_all(&encode_all(&input)).unwrap(), input);
    }

    #[test]
    fn test_encode_buffers_until_flush() {
        let mut encoder = SnappyEncoder::new();
        let mut output = BytesMut::new();

        encoder.encode(b"partial", &mut output).unwrap();
        assert!(output.is_empty());
        assert_eq!(encoder.buffered(), 7);

        encoder.flush(&mut output).unwrap();
        assert!(!output.is_empty());
        assert_eq!(encoder.buffered(), 0);

        // Flushing again with nothing buffered emits nothing.
        let len = output.len();
        encoder.flush(&mut output).unwrap();
        assert_eq!(output.len(), len);
    }

    #[test]
    fn test_full_block_emitted_without_flush() {
        let mut encoder = SnappyEncoder::new();
        let mut output = BytesMut::new();
        encoder.encode(&[1u8; 1000], &mut output).unwrap();
        encoder
            .encode(&[2u8; MAX_BLOCK_SIZE - 1000], &mut output)
            .unwrap();
        assert!(!output.is_empty());
        assert_eq!(encoder.buffered(), 0);
    }

    #[test]
    fn test_identifier_written_once() {
        let mut encoder = SnappyEncoder::new();
        let mut output = BytesMut::new();
        encoder.encode(b"one", &mut output).unwrap();
        encoder.flush(&mut output).unwrap();
        encoder.encode(b"two", &mut output).unwrap();
        encoder.flush(&mut output).unwrap();

        let count = output
            .windows(STREAM_IDENTIFIER.len())
            .filter(|w| *w == STREAM_IDENTIFIER)
            .count();
        assert_eq!(count, 1);
        assert_eq!(decode_all(&output).unwrap(), b"onetwo");
    }

    #[test]
    fn test_reset_starts_new_stream() {
        let mut encoder = SnappyEncoder::new();
        let mut output = BytesMut::new();
        encoder.encode(b"discarded", &mut output).unwrap();
        encoder.reset();
        assert_eq!(encoder.buffered(), 0);

        encoder.encode(b"kept", &mut output).unwrap();
        encoder.finish(&mut output).unwrap();
        assert_eq!(decode_all(&output).unwrap(), b"kept");
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let input: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let encoded = encode_all(&input);

        let mut decoder = SnappyDecoder::new();
        let mut decoded = Vec::new();
        for byte in encoded.iter() {
            decoder.push(&[*byte]);
            while let Some(chunk) = decoder.decode().unwrap() {
                decoded.extend_from_slice(&chunk);
            }
        }
        decoder.finish().unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_missing_identifier() {
        let encoded = encode_all(b"hello");
        let err = decode_all(&encoded[STREAM_IDENTIFIER.len()..]).unwrap_err();
        assert!(matches!(err, CodecError::MissingStreamIdentifier));
    }

    #[test]
    fn test_invalid_identifier() {
        let err = decode_all(b"\xff\x06\x00\x00sNaPpZ").unwrap_err();
        assert!(matches!(err, CodecError::InvalidStreamIdentifier));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut encoded = encode_all(b"hello hello hello hello").to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;
        let err = decode_all(&encoded).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ChecksumMismatch | CodecError::Block(_)
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let encoded = encode_all(&random_bytes(500));
        let err = decode_all(&encoded[..encoded.len() - 10]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof));

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_padding_and_skippable_chunks_ignored() {
        let encoded = encode_all(b"payload");
        let mut stream = encoded[..STREAM_IDENTIFIER.len()].to_vec();
        stream.extend_from_slice(&[CHUNK_PADDING, 3, 0, 0, 0, 0, 0]);
        stream.extend_from_slice(&[0x80, 2, 0, 0, 9, 9]);
        stream.extend_from_slice(&encoded[STREAM_IDENTIFIER.len()..]);
        assert_eq!(decode_all(&stream).unwrap(), b"payload");
    }

    #[test]
    fn test_unskippable_chunk_rejected() {
        let mut stream = STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&[0x02, 1, 0, 0, 0]);
        let err = decode_all(&stream).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedChunk(0x02)));

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_oversized_chunk_rejected_before_body_arrives() {
        let mut decoder = SnappyDecoder::new();
        decoder.push(STREAM_IDENTIFIER);
        decoder.push(&[CHUNK_UNCOMPRESSED, 0xff, 0xff, 0x01]);
        let err = decoder.decode().unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidChunkLength {
                kind: CHUNK_UNCOMPRESSED,
                ..
            }
        ));
    }

    #[test]
    fn test_decoder_reset_discards_partial_input() {
        let encoded = encode_all(b"first stream");
        let mut decoder = SnappyDecoder::new();
        decoder.push(&encoded[..encoded.len() - 3]);
        assert!(decoder.decode().unwrap().is_none());
        assert!(decoder.finish().is_err());

        decoder.reset();
        decoder.push(&encode_all(b"second"));
        assert_eq!(decoder.decode().unwrap().unwrap(), Bytes::from("second"));
        decoder.finish().unwrap();
    }
}
