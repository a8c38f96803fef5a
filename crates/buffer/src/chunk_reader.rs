//! Chunk stream primitives.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A boxed stream of bytes, the form in which storage backends deliver
/// streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Size of reads issued against byte readers when chunking them (64 KiB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A pull iterator over the chunks of an object.
///
/// `Ok(Some(chunk))` yields a non-empty chunk, `Ok(None)` indicates clean
/// end of stream, and any error is terminal. Dropping the reader releases
/// the underlying resources, on every exit path.
#[async_trait]
pub trait ChunkReader: Send {
    /// Pull the next chunk.
    async fn read(&mut self) -> Result<Option<Bytes>>;
}

/// Yields an in-memory slice as a single chunk.
pub struct BytesChunkReader {
    data: Option<Bytes>,
}

impl BytesChunkReader {
    pub fn new(data: Bytes) -> BytesChunkReader {
        BytesChunkReader {
            data: (!data.is_empty()).then_some(data),
        }
    }
}

#[async_trait]
impl ChunkReader for BytesChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        Ok(self.data.take())
    }
}

/// Chunks a byte reader, bounding every chunk by a read-buffer size.
pub struct ReaderChunkReader {
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl ReaderChunkReader {
    pub fn new(reader: Box<dyn AsyncRead + Send + Unpin>) -> ReaderChunkReader {
        ReaderChunkReader { reader }
    }
}

#[async_trait]
impl ChunkReader for ReaderChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let n = self
            .reader
            .read(&mut buf)
            .await
            .map_err(Error::from_io_error)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

/// Adapts a backend byte stream to a chunk reader.
pub struct StreamChunkReader {
    stream: ByteStream,
}

impl StreamChunkReader {
    pub fn new(stream: ByteStream) -> StreamChunkReader {
        StreamChunkReader { stream }
    }
}

#[async_trait]
impl ChunkReader for StreamChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.stream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return Ok(Some(chunk)),
                Some(Err(err)) => return Err(err),
                None => return Ok(None),
            }
        }
    }
}

/// Reports a fixed error on every read.
pub(crate) struct ErrorChunkReader(pub(crate) Error);

#[async_trait]
impl ChunkReader for ErrorChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        Err(self.0.clone())
    }
}

/// Discards a leading number of bytes from an inner reader.
///
/// The skipped bytes still pass through whatever validation the inner
/// reader performs.
pub(crate) struct SkippingChunkReader {
    inner: Box<dyn ChunkReader>,
    remaining: u64,
}

impl SkippingChunkReader {
    pub(crate) fn new(inner: Box<dyn ChunkReader>, offset_bytes: u64) -> SkippingChunkReader {
        SkippingChunkReader {
            inner,
            remaining: offset_bytes,
        }
    }
}

#[async_trait]
impl ChunkReader for SkippingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        while self.remaining > 0 {
            match self.inner.read().await? {
                Some(mut chunk) => {
                    if chunk.len() as u64 <= self.remaining {
                        self.remaining -= chunk.len() as u64;
                        continue;
                    }
                    let chunk = chunk.split_off(self.remaining as usize);
                    self.remaining = 0;
                    return Ok(Some(chunk));
                }
                None => {
                    self.remaining = 0;
                    return Ok(None);
                }
            }
        }
        self.inner.read().await
    }
}
