//! Error handling with retry and stream stitching.

use crate::buffer::Buffer;
use crate::chunk_reader::{ChunkReader, SkippingChunkReader};
use crate::error::{Error, Result};
use crate::message::CacheMessage;
use crate::repair::RepairStrategy;
use crate::source::Source;
use crate::validating::ValidatingChunkReader;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::Digest;
use futures::future::BoxFuture;
use tracing::debug;

/// A consumer-provided retry policy.
///
/// Every error observed while consuming the wrapped buffer surfaces as
/// exactly one `on_error` call, which may supply a replacement buffer for
/// the same object or decline with a terminal error. `done` is called
/// exactly once when consumption finishes, whatever the outcome.
pub trait ErrorHandler: Send + 'static {
    /// React to an error: return a replacement buffer to resume from, or a
    /// terminal error to surface to the consumer.
    fn on_error(&mut self, err: Error) -> std::result::Result<Buffer, Error>;

    /// Consumption has finished.
    fn done(&mut self);
}

/// Owns an error handler and guarantees `done` is invoked exactly once,
/// even when consumption ends by dropping a partially read stream.
pub(crate) struct HandlerCell {
    handler: Option<Box<dyn ErrorHandler>>,
}

impl HandlerCell {
    pub(crate) fn new(handler: Box<dyn ErrorHandler>) -> HandlerCell {
        HandlerCell {
            handler: Some(handler),
        }
    }

    pub(crate) fn on_error(&mut self, err: Error) -> std::result::Result<Buffer, Error> {
        self.handler
            .as_mut()
            .expect("error handler consulted after done")
            .on_error(err)
    }

    pub(crate) fn finish(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler.done();
        }
    }
}

impl Drop for HandlerCell {
    fn drop(&mut self) {
        self.finish();
    }
}

/// A stream-backed buffer wrapped with an error handler.
///
/// Whether the stream can be read successfully is unknown until it is
/// consumed, so the handler is consulted lazily, when errors are actually
/// observed. Operations that materialize the whole object retry by fully
/// redoing the operation against the replacement; streaming operations
/// stitch the replacement in at the byte offset already delivered.
pub(crate) struct ErrorHandlingBuffer {
    inner: Box<Buffer>,
    handler: HandlerCell,
    digest: Digest,
    repair: RepairStrategy,
    source: Source,
}

impl ErrorHandlingBuffer {
    pub(crate) fn new(inner: Buffer, handler: HandlerCell) -> ErrorHandlingBuffer {
        let (digest, repair, source) = inner
            .stream_parts()
            .expect("stream-backed buffers carry a digest");
        ErrorHandlingBuffer {
            inner: Box::new(inner),
            handler,
            digest,
            repair,
            source,
        }
    }

    pub(crate) fn digest(&self) -> &Digest {
        &self.digest
    }

    pub(crate) fn parts(&self) -> (Digest, RepairStrategy, Source) {
        (
            self.digest.clone(),
            self.repair.clone(),
            self.source.clone(),
        )
    }

    /// Materialize with whole-operation retries: a failed attempt is fully
    /// redone against the replacement buffer, each attempt validating its
    /// own stream.
    pub(crate) fn to_bytes(self, maximum_size_bytes: usize) -> BoxFuture<'static, Result<Bytes>> {
        let ErrorHandlingBuffer {
            inner, mut handler, ..
        } = self;
        Box::pin(async move {
            let mut buffer = *inner;
            loop {
                match buffer.to_bytes(maximum_size_bytes).await {
                    Ok(data) => {
                        handler.finish();
                        return Ok(data);
                    }
                    Err(err) => match handler.on_error(err) {
                        Ok(replacement) => {
                            debug!("error handler substituted a replacement buffer");
                            buffer = replacement;
                        }
                        Err(terminal) => {
                            handler.finish();
                            return Err(terminal);
                        }
                    },
                }
            }
        })
    }

    /// Parse with whole-operation retries. Parse failures are retried just
    /// like fetch failures: the replacement is fetched and parsed anew.
    pub(crate) fn to_message<M: CacheMessage>(
        self,
        maximum_size_bytes: usize,
    ) -> BoxFuture<'static, Result<M>> {
        let ErrorHandlingBuffer {
            inner, mut handler, ..
        } = self;
        Box::pin(async move {
            let mut buffer = *inner;
            loop {
                match buffer.to_message::<M>(maximum_size_bytes).await {
                    Ok(message) => {
                        handler.finish();
                        return Ok(message);
                    }
                    Err(err) => match handler.on_error(err) {
                        Ok(replacement) => {
                            debug!("error handler substituted a replacement buffer");
                            buffer = replacement;
                        }
                        Err(terminal) => {
                            handler.finish();
                            return Err(terminal);
                        }
                    },
                }
            }
        })
    }

    /// Positional reads retry like [`ErrorHandlingBuffer::to_bytes`]: the
    /// read is redone in full against the replacement.
    pub(crate) fn read_at<'a>(
        self,
        out: &'a mut [u8],
        offset_bytes: i64,
    ) -> BoxFuture<'a, Result<usize>> {
        let ErrorHandlingBuffer {
            inner, mut handler, ..
        } = self;
        Box::pin(async move {
            let mut buffer = *inner;
            loop {
                match buffer.read_at(out, offset_bytes).await {
                    Ok(n) => {
                        handler.finish();
                        return Ok(n);
                    }
                    Err(err) => match handler.on_error(err) {
                        Ok(replacement) => {
                            debug!("error handler substituted a replacement buffer");
                            buffer = replacement;
                        }
                        Err(terminal) => {
                            handler.finish();
                            return Err(terminal);
                        }
                    },
                }
            }
        })
    }

    /// The streaming side of retrying.
    ///
    /// Attempts are consumed unvalidated and stitched together at the byte
    /// offset already delivered; a single validating layer on top hashes
    /// exactly the stitched sequence, so corruption introduced by a failed
    /// attempt surfaces as a checksum error even after a seamless resume.
    /// The requested offset is skipped above validation, which keeps the
    /// hash covering the whole object.
    pub(crate) fn into_validated_chunk_reader(self, offset_bytes: u64) -> Box<dyn ChunkReader> {
        let (digest, repair, source) = self.parts();
        let retrying = self.into_stitched_chunk_reader(0);
        let validating = Box::new(ValidatingChunkReader::new(retrying, &digest, repair, source));
        if offset_bytes == 0 {
            validating
        } else {
            Box::new(SkippingChunkReader::new(validating, offset_bytes))
        }
    }

    /// The stitched stream without the validating layer, positioned at an
    /// absolute offset. Used when a nested wrapper's output feeds another
    /// wrapper's validator.
    pub(crate) fn into_stitched_chunk_reader(self, offset_bytes: u64) -> Box<dyn ChunkReader> {
        let ErrorHandlingBuffer { inner, handler, .. } = self;
        Box::new(RetryingChunkReader {
            current: inner.into_unvalidated_chunk_reader(offset_bytes),
            handler,
            offset_bytes,
            terminal: None,
        })
    }
}

/// Pulls from the current attempt's chunk stream and, on error, switches
/// to a replacement supplied by the handler, positioned at the byte offset
/// already delivered downstream. Bytes already delivered are never
/// retracted.
struct RetryingChunkReader {
    current: Box<dyn ChunkReader>,
    handler: HandlerCell,
    offset_bytes: u64,
    terminal: Option<Error>,
}

#[async_trait]
impl ChunkReader for RetryingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        loop {
            match self.current.read().await {
                Ok(Some(chunk)) => {
                    self.offset_bytes += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Ok(None) => {
                    self.handler.finish();
                    return Ok(None);
                }
                Err(err) => match self.handler.on_error(err) {
                    Ok(replacement) => {
                        debug!(
                            offset_bytes = self.offset_bytes,
                            "resuming stream from replacement buffer"
                        );
                        self.current = replacement.into_unvalidated_chunk_reader(self.offset_bytes);
                    }
                    Err(terminal) => {
                        self.handler.finish();
                        self.terminal = Some(terminal.clone());
                        return Err(terminal);
                    }
                },
            }
        }
    }
}
