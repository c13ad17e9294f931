//! Chunk payload encoding.
//!
//! A chunk is stored as NDJSON, one record per line, optionally compressed
//! with zstd or xz. The SHA-256 of the stored bytes is recorded in the
//! catalog and checked again when the chunk is read back.

use async_compression::tokio::bufread::{XzDecoder, ZstdDecoder};
use async_compression::tokio::write::{XzEncoder, ZstdEncoder};
use bytes::Bytes;
use serde_json::Value;
use sextant_core::config::CompressionConfig;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Result of encoding a chunk payload.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// The stored bytes.
    pub data: Bytes,
    /// Hex SHA-256 of `data`.
    pub content_hash: String,
    /// Size of `data`.
    pub size: u64,
}

/// Hex SHA-256 of a stored payload.
pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Serialize one record as an NDJSON line.
pub fn encode_line(row: &Value) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(row)?;
    line.push(b'\n');
    Ok(line)
}

/// Streaming chunk compressor.
///
/// Lines are pushed through a single encoder so that compression context is
/// shared across the whole chunk.
pub struct ChunkEncoder {
    inner: ChunkEncoderInner,
}

enum ChunkEncoderInner {
    None(Vec<u8>),
    Zstd(ZstdEncoder<Vec<u8>>),
    Xz(XzEncoder<Vec<u8>>),
}

impl ChunkEncoder {
    pub fn new(compression: CompressionConfig) -> Self {
        let inner = match compression {
            CompressionConfig::None => ChunkEncoderInner::None(Vec::new()),
            CompressionConfig::Zstd => ChunkEncoderInner::Zstd(ZstdEncoder::with_quality(
                Vec::new(),
                async_compression::Level::Default,
            )),
            CompressionConfig::Xz => ChunkEncoderInner::Xz(XzEncoder::with_quality(
                Vec::new(),
                async_compression::Level::Default,
            )),
        };
        Self { inner }
    }

    pub async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match &mut self.inner {
            ChunkEncoderInner::None(buf) => buf.extend_from_slice(data),
            ChunkEncoderInner::Zstd(encoder) => encoder.write_all(data).await?,
            ChunkEncoderInner::Xz(encoder) => encoder.write_all(data).await?,
        }
        Ok(())
    }

    /// Finish compression and hash the stored bytes.
    pub async fn finish(self) -> std::io::Result<EncodedChunk> {
        let data = match self.inner {
            ChunkEncoderInner::None(buf) => buf,
            ChunkEncoderInner::Zstd(mut encoder) => {
                encoder.shutdown().await?;
                encoder.into_inner()
            }
            ChunkEncoderInner::Xz(mut encoder) => {
                encoder.shutdown().await?;
                encoder.into_inner()
            }
        };

        Ok(EncodedChunk {
            content_hash: content_hash(&data),
            size: data.len() as u64,
            data: Bytes::from(data),
        })
    }
}

/// Encode a run of records as one chunk payload.
pub async fn encode_rows(
    rows: &[Value],
    compression: CompressionConfig,
) -> std::io::Result<EncodedChunk> {
    let mut encoder = ChunkEncoder::new(compression);
    for row in rows {
        encoder.write(&encode_line(row)?).await?;
    }
    encoder.finish().await
}

/// Decompress a stored payload.
pub async fn decompress(data: &[u8], compression: CompressionConfig) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len());
    match compression {
        CompressionConfig::None => output.extend_from_slice(data),
        CompressionConfig::Zstd => {
            ZstdDecoder::new(data).read_to_end(&mut output).await?;
        }
        CompressionConfig::Xz => {
            XzDecoder::new(data).read_to_end(&mut output).await?;
        }
    }
    Ok(output)
}

/// Decode a stored payload back into its records.
pub async fn decode_rows(
    data: &[u8],
    compression: CompressionConfig,
) -> std::io::Result<Vec<Value>> {
    let raw = decompress(data, compression).await?;
    raw.split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).map_err(std::io::Error::from))
        .collect()
}
