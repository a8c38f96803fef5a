//! The polymorphic buffer handle.

use crate::chunk_reader::{
    ByteStream, BytesChunkReader, ChunkReader, ErrorChunkReader, ReaderChunkReader,
    SkippingChunkReader, StreamChunkReader,
};
use crate::cloning::{self, CloneStreamConsumer};
use crate::error::{Error, Result};
use crate::error_handling::{ErrorHandler, ErrorHandlingBuffer, HandlerCell};
use crate::message::{self, CacheMessage, ErasedMessage, TypedMessage};
use crate::normalizing::{ChunkPolicy, NormalizingChunkReader};
use crate::repair::RepairStrategy;
use crate::source::Source;
use crate::validating::ValidatingChunkReader;
use bytes::{Bytes, BytesMut};
use depot_core::hash::encode_hex;
use depot_core::Digest;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// A handle to the contents of a single CAS or AC object.
///
/// The bytes behind a buffer may be held in memory, produced by a
/// streaming reader, produced chunk by chunk, or stand in for an error
/// that occurred while obtaining them. Consumers call exactly one terminal
/// operation; the buffer selects the cheapest path that still validates
/// integrity. Terminal operations take the buffer by value, so a consumed
/// buffer cannot be reused.
pub struct Buffer {
    kind: BufferKind,
}

enum BufferKind {
    /// In-memory bytes with no remaining integrity checks.
    Validated(Bytes),
    /// An already-parsed Action Cache message, serialized on demand.
    Message(Arc<dyn ErasedMessage>),
    /// A deferred error; every operation reports it.
    Error(Error),
    /// CAS contents behind a byte reader, not yet validated.
    CasReader {
        digest: Digest,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        repair: RepairStrategy,
        source: Source,
    },
    /// CAS contents behind a chunk reader, not yet validated.
    CasChunkReader {
        digest: Digest,
        reader: Box<dyn ChunkReader>,
        repair: RepairStrategy,
        source: Source,
    },
    /// A stream-backed buffer wrapped with an error handler.
    ErrorHandling(ErrorHandlingBuffer),
    /// One half of a stream-cloned pair.
    ClonedStream(CloneStreamConsumer),
}

impl Buffer {
    /// Buffer backed by a byte slice whose integrity needs no further
    /// checking.
    pub fn new_validated_from_bytes(data: impl Into<Bytes>) -> Buffer {
        Buffer {
            kind: BufferKind::Validated(data.into()),
        }
    }

    /// Buffer for an Action Cache object backed by a byte slice.
    ///
    /// The data is parsed as a message of type `M` up front; a parse
    /// failure is reported through the source and yields an error buffer.
    pub fn new_ac_from_bytes<M: CacheMessage>(data: impl Into<Bytes>, source: Source) -> Buffer {
        let data = data.into();
        match message::unmarshal::<M>(&data) {
            Ok(_) => {
                source.notify_data_valid();
                Buffer::new_validated_from_bytes(data)
            }
            Err(Error::UnmarshalFailure(reason)) => {
                Buffer::new_from_error(source.notify_parse_failure(reason))
            }
            Err(err) => Buffer::new_from_error(err),
        }
    }

    /// Buffer for an Action Cache object that has already been parsed.
    pub fn new_ac_from_message<M: CacheMessage>(message: M) -> Buffer {
        Buffer {
            kind: BufferKind::Message(Arc::new(TypedMessage(message))),
        }
    }

    /// Buffer for a CAS object backed by a byte slice.
    ///
    /// Size and checksum are validated against the digest up front; on a
    /// mismatch the source is notified, the repair strategy fires, and an
    /// error buffer is returned.
    pub fn new_cas_from_bytes(
        digest: &Digest,
        data: impl Into<Bytes>,
        repair: RepairStrategy,
        source: Source,
    ) -> Buffer {
        let data = data.into();
        let actual_size = data.len() as u64;
        if actual_size != digest.size_bytes() {
            let err = source.notify_size_mismatch(digest.size_bytes(), actual_size);
            repair.on_integrity_failure();
            return Buffer::new_from_error(err);
        }
        let mut hasher = digest.hasher();
        hasher.update(&data);
        let actual = hasher.finalize();
        if actual != digest.hash_bytes() {
            let err = source.notify_hash_mismatch(digest.hash_hex(), encode_hex(&actual));
            repair.on_integrity_failure();
            return Buffer::new_from_error(err);
        }
        source.notify_data_valid();
        Buffer::new_validated_from_bytes(data)
    }

    /// Buffer for a CAS object whose contents may be obtained through a
    /// byte reader. The buffer takes ownership of the reader.
    pub fn new_cas_from_reader(
        digest: &Digest,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        repair: RepairStrategy,
        source: Source,
    ) -> Buffer {
        Buffer {
            kind: BufferKind::CasReader {
                digest: digest.clone(),
                reader,
                repair,
                source,
            },
        }
    }

    /// Buffer for a CAS object whose contents may be obtained through a
    /// chunk reader. The buffer takes ownership of the reader.
    pub fn new_cas_from_chunk_reader(
        digest: &Digest,
        reader: Box<dyn ChunkReader>,
        repair: RepairStrategy,
        source: Source,
    ) -> Buffer {
        Buffer {
            kind: BufferKind::CasChunkReader {
                digest: digest.clone(),
                reader,
                repair,
                source,
            },
        }
    }

    /// Buffer for a CAS object delivered as a backend byte stream.
    pub fn new_cas_from_stream(
        digest: &Digest,
        stream: ByteStream,
        repair: RepairStrategy,
        source: Source,
    ) -> Buffer {
        Buffer::new_cas_from_chunk_reader(
            digest,
            Box::new(StreamChunkReader::new(stream)),
            repair,
            source,
        )
    }

    /// Buffer standing in for an error. Every operation reports the error.
    pub fn new_from_error(err: Error) -> Buffer {
        Buffer {
            kind: BufferKind::Error(err),
        }
    }

    pub(crate) fn from_cloned_stream(consumer: CloneStreamConsumer) -> Buffer {
        Buffer {
            kind: BufferKind::ClonedStream(consumer),
        }
    }

    /// Apply an error handler to this buffer.
    ///
    /// Buffers in a known state (in-memory, parsed, error) evaluate the
    /// handler immediately; stream-backed buffers return a wrapper that
    /// consults the handler once errors are actually observed. `done()` is
    /// invoked exactly once, at the end of consumption, on every terminal
    /// path.
    pub fn with_error_handler(self, handler: Box<dyn ErrorHandler>) -> Buffer {
        let mut cell = HandlerCell::new(handler);
        let mut buffer = self;
        loop {
            buffer = match buffer.kind {
                BufferKind::Error(err) => match cell.on_error(err) {
                    Ok(replacement) => replacement,
                    Err(terminal) => {
                        cell.finish();
                        return Buffer::new_from_error(terminal);
                    }
                },
                kind @ (BufferKind::Validated(_) | BufferKind::Message(_)) => {
                    cell.finish();
                    return Buffer { kind };
                }
                kind => {
                    return Buffer {
                        kind: BufferKind::ErrorHandling(ErrorHandlingBuffer::new(
                            Buffer { kind },
                            cell,
                        )),
                    };
                }
            };
        }
    }

    /// The size of the object in bytes. Cheap; consumes no data.
    pub fn size_bytes(&self) -> Result<u64> {
        match &self.kind {
            BufferKind::Validated(data) => Ok(data.len() as u64),
            BufferKind::Message(message) => Ok(message.marshal()?.len() as u64),
            BufferKind::Error(err) => Err(err.clone()),
            BufferKind::CasReader { digest, .. } | BufferKind::CasChunkReader { digest, .. } => {
                Ok(digest.size_bytes())
            }
            BufferKind::ErrorHandling(wrapper) => Ok(wrapper.digest().size_bytes()),
            BufferKind::ClonedStream(consumer) => Ok(consumer.digest().size_bytes()),
        }
    }

    /// Write the object's contents to `writer`, validating integrity along
    /// the way. The writer is caller-owned and is not shut down.
    pub async fn into_writer<W>(self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self.kind {
            BufferKind::Validated(data) => {
                writer.write_all(&data).await.map_err(Error::from_io_error)
            }
            BufferKind::Error(err) => Err(err),
            kind => {
                let mut reader = Buffer { kind }.into_raw_chunk_reader(0);
                while let Some(chunk) = reader.read().await? {
                    writer
                        .write_all(&chunk)
                        .await
                        .map_err(Error::from_io_error)?;
                }
                Ok(())
            }
        }
    }

    /// Read up to `out.len()` bytes at `offset_bytes`.
    ///
    /// A short count (including zero) indicates the end of the object.
    /// Stream-backed buffers discard the leading bytes, fill `out`, and
    /// then drain the remainder so checksum validation covers the whole
    /// stream before the call returns.
    pub async fn read_at(self, out: &mut [u8], offset_bytes: i64) -> Result<usize> {
        if offset_bytes < 0 {
            return Err(Error::NegativeReadOffset(offset_bytes));
        }
        let offset = offset_bytes as u64;
        match self.kind {
            BufferKind::Validated(data) => {
                if offset >= data.len() as u64 {
                    return Ok(0);
                }
                let tail = &data[offset as usize..];
                let n = tail.len().min(out.len());
                out[..n].copy_from_slice(&tail[..n]);
                Ok(n)
            }
            BufferKind::Error(err) => Err(err),
            BufferKind::ErrorHandling(wrapper) => wrapper.read_at(out, offset_bytes).await,
            kind => {
                let mut reader = Buffer { kind }.into_raw_chunk_reader(offset);
                fill_and_drain(reader.as_mut(), out).await
            }
        }
    }

    /// Parse the object as an Action Cache message of type `M`.
    ///
    /// The size cap is enforced before parsing, because the contents are
    /// materialized through [`Buffer::to_bytes`] first.
    pub async fn to_message<M: CacheMessage>(self, maximum_size_bytes: usize) -> Result<M> {
        match self.kind {
            BufferKind::Message(message) => {
                if let Some(typed) = message.as_any().downcast_ref::<M>() {
                    return Ok(typed.clone());
                }
                // A message of a different type: round-trip through the
                // wire form.
                let data = message.marshal()?;
                message::unmarshal(&data)
            }
            BufferKind::ErrorHandling(wrapper) => wrapper.to_message(maximum_size_bytes).await,
            kind => {
                let data = Buffer { kind }.to_bytes(maximum_size_bytes).await?;
                message::unmarshal(&data)
            }
        }
    }

    /// Materialize the object into a single byte buffer, if and only if it
    /// does not exceed `maximum_size_bytes`.
    pub async fn to_bytes(self, maximum_size_bytes: usize) -> Result<Bytes> {
        match self.kind {
            BufferKind::Validated(data) => {
                check_maximum_size(data.len() as u64, maximum_size_bytes)?;
                Ok(data)
            }
            BufferKind::Message(message) => {
                let data = message.marshal()?;
                check_maximum_size(data.len() as u64, maximum_size_bytes)?;
                Ok(data)
            }
            BufferKind::Error(err) => Err(err),
            BufferKind::ErrorHandling(wrapper) => wrapper.to_bytes(maximum_size_bytes).await,
            kind => {
                let buffer = Buffer { kind };
                let size = buffer.size_bytes()?;
                if let Err(err) = check_maximum_size(size, maximum_size_bytes) {
                    buffer.discard();
                    return Err(err);
                }
                let mut reader = buffer.into_raw_chunk_reader(0);
                let mut data = BytesMut::with_capacity(size as usize);
                while let Some(chunk) = reader.read().await? {
                    data.extend_from_slice(&chunk);
                }
                Ok(data.freeze())
            }
        }
    }

    /// A streaming reader over the object's contents that validates
    /// integrity on the final read.
    ///
    /// Typed errors cross the `AsyncRead` boundary inside `io::Error` and
    /// can be recovered with [`Error::from_io_error`].
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        let mut reader = self.into_raw_chunk_reader(0);
        let stream = async_stream::stream! {
            loop {
                match reader.read().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err.into_io_error());
                        break;
                    }
                }
            }
        };
        StreamReader::new(Box::pin(stream))
    }

    /// A positioned, rechunked, validating reader over the object's
    /// contents.
    pub fn into_chunk_reader(self, offset_bytes: i64, policy: ChunkPolicy) -> Box<dyn ChunkReader> {
        let size = match self.size_bytes() {
            Ok(size) => size,
            Err(err) => {
                self.discard();
                return Box::new(ErrorChunkReader(err));
            }
        };
        if let Err(err) = validate_reader_offset(size, offset_bytes) {
            self.discard();
            return Box::new(ErrorChunkReader(err));
        }
        let raw = self.into_raw_chunk_reader(offset_bytes as u64);
        Box::new(NormalizingChunkReader::new(raw, policy))
    }

    /// Split into two buffers by materializing the contents once; the
    /// results share the same allocation. If materialization fails, both
    /// buffers carry the same error.
    pub async fn clone_copy(self, maximum_size_bytes: usize) -> (Buffer, Buffer) {
        match self.kind {
            BufferKind::Validated(data) => (
                Buffer::new_validated_from_bytes(data.clone()),
                Buffer::new_validated_from_bytes(data),
            ),
            BufferKind::Message(message) => (
                Buffer {
                    kind: BufferKind::Message(message.clone()),
                },
                Buffer {
                    kind: BufferKind::Message(message),
                },
            ),
            BufferKind::Error(err) => (
                Buffer::new_from_error(err.clone()),
                Buffer::new_from_error(err),
            ),
            kind => match (Buffer { kind }).to_bytes(maximum_size_bytes).await {
                Ok(data) => (
                    Buffer::new_validated_from_bytes(data.clone()),
                    Buffer::new_validated_from_bytes(data),
                ),
                Err(err) => (
                    Buffer::new_from_error(err.clone()),
                    Buffer::new_from_error(err),
                ),
            },
        }
    }

    /// Split into two buffers that stream the same source concurrently
    /// without reading it twice. See the cloning coordinator for the
    /// back-pressure and termination contract.
    pub fn clone_stream(self) -> (Buffer, Buffer) {
        match self.kind {
            BufferKind::Validated(data) => (
                Buffer::new_validated_from_bytes(data.clone()),
                Buffer::new_validated_from_bytes(data),
            ),
            BufferKind::Message(message) => (
                Buffer {
                    kind: BufferKind::Message(message.clone()),
                },
                Buffer {
                    kind: BufferKind::Message(message),
                },
            ),
            BufferKind::Error(err) => (
                Buffer::new_from_error(err.clone()),
                Buffer::new_from_error(err),
            ),
            kind => cloning::new_clone_stream_pair(Buffer { kind }),
        }
    }

    /// Release the buffer without reading it. Underlying streams are
    /// closed and an attached error handler observes `done`.
    pub fn discard(self) {}

    /// The digest a stream-backed buffer was constructed against, along
    /// with its repair strategy and source.
    pub(crate) fn stream_parts(&self) -> Option<(Digest, RepairStrategy, Source)> {
        match &self.kind {
            BufferKind::CasReader {
                digest,
                repair,
                source,
                ..
            }
            | BufferKind::CasChunkReader {
                digest,
                repair,
                source,
                ..
            } => Some((digest.clone(), repair.clone(), source.clone())),
            BufferKind::ErrorHandling(wrapper) => Some(wrapper.parts()),
            BufferKind::ClonedStream(consumer) => Some(consumer.parts()),
            _ => None,
        }
    }

    /// The validating, positioned, unnormalized chunk stream over this
    /// buffer's contents. Skipped leading bytes still flow through
    /// validation.
    pub(crate) fn into_raw_chunk_reader(self, offset_bytes: u64) -> Box<dyn ChunkReader> {
        match self.kind {
            BufferKind::Validated(data) => bytes_chunk_reader_at(data, offset_bytes),
            BufferKind::Message(message) => match message.marshal() {
                Ok(data) => bytes_chunk_reader_at(data, offset_bytes),
                Err(err) => Box::new(ErrorChunkReader(err)),
            },
            BufferKind::Error(err) => Box::new(ErrorChunkReader(err)),
            BufferKind::CasReader {
                digest,
                reader,
                repair,
                source,
            } => positioned_validating_reader(
                Box::new(ReaderChunkReader::new(reader)),
                &digest,
                repair,
                source,
                offset_bytes,
            ),
            BufferKind::CasChunkReader {
                digest,
                reader,
                repair,
                source,
            } => positioned_validating_reader(reader, &digest, repair, source, offset_bytes),
            BufferKind::ErrorHandling(wrapper) => wrapper.into_validated_chunk_reader(offset_bytes),
            BufferKind::ClonedStream(consumer) => {
                consumer.into_validated_chunk_reader(offset_bytes)
            }
        }
    }

    /// The positioned chunk stream over this buffer's contents without any
    /// additional validating layer. Used where the delivered sequence is
    /// hashed above, such as by a retry wrapper over its stitched stream.
    pub(crate) fn into_unvalidated_chunk_reader(self, offset_bytes: u64) -> Box<dyn ChunkReader> {
        match self.kind {
            BufferKind::Validated(data) => bytes_chunk_reader_at(data, offset_bytes),
            BufferKind::Message(message) => match message.marshal() {
                Ok(data) => bytes_chunk_reader_at(data, offset_bytes),
                Err(err) => Box::new(ErrorChunkReader(err)),
            },
            BufferKind::Error(err) => Box::new(ErrorChunkReader(err)),
            BufferKind::CasReader { reader, .. } => positioned_reader(
                Box::new(ReaderChunkReader::new(reader)),
                offset_bytes,
            ),
            BufferKind::CasChunkReader { reader, .. } => positioned_reader(reader, offset_bytes),
            BufferKind::ErrorHandling(wrapper) => wrapper.into_stitched_chunk_reader(offset_bytes),
            BufferKind::ClonedStream(consumer) => {
                consumer.into_unvalidated_chunk_reader(offset_bytes)
            }
        }
    }
}

fn bytes_chunk_reader_at(data: Bytes, offset_bytes: u64) -> Box<dyn ChunkReader> {
    if offset_bytes > data.len() as u64 {
        return Box::new(ErrorChunkReader(Error::ReadOffsetOutOfBounds {
            size: data.len() as u64,
            offset: offset_bytes as i64,
        }));
    }
    Box::new(BytesChunkReader::new(data.slice(offset_bytes as usize..)))
}

fn positioned_validating_reader(
    inner: Box<dyn ChunkReader>,
    digest: &Digest,
    repair: RepairStrategy,
    source: Source,
    offset_bytes: u64,
) -> Box<dyn ChunkReader> {
    // The offset is skipped above validation: discarded leading bytes are
    // still hashed, so the digest check covers the whole object.
    positioned_reader(
        Box::new(ValidatingChunkReader::new(inner, digest, repair, source)),
        offset_bytes,
    )
}

fn positioned_reader(inner: Box<dyn ChunkReader>, offset_bytes: u64) -> Box<dyn ChunkReader> {
    if offset_bytes == 0 {
        inner
    } else {
        Box::new(SkippingChunkReader::new(inner, offset_bytes))
    }
}

fn check_maximum_size(size: u64, maximum_size_bytes: usize) -> Result<()> {
    if size > maximum_size_bytes as u64 {
        return Err(Error::MaximumSizeExceeded {
            size,
            maximum: maximum_size_bytes as u64,
        });
    }
    Ok(())
}

fn validate_reader_offset(size: u64, offset_bytes: i64) -> Result<()> {
    if offset_bytes < 0 {
        return Err(Error::NegativeReadOffset(offset_bytes));
    }
    if offset_bytes as u64 > size {
        return Err(Error::ReadOffsetOutOfBounds {
            size,
            offset: offset_bytes,
        });
    }
    Ok(())
}

async fn fill_and_drain(reader: &mut dyn ChunkReader, out: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    loop {
        match reader.read().await? {
            Some(chunk) => {
                if filled < out.len() {
                    let n = chunk.len().min(out.len() - filled);
                    out[filled..filled + n].copy_from_slice(&chunk[..n]);
                    filled += n;
                }
                // Bytes past the destination are dropped; the stream is
                // still drained so validation completes.
            }
            None => return Ok(filled),
        }
    }
}
