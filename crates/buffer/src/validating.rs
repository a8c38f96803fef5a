//! Digest validation of chunk streams.

use crate::chunk_reader::ChunkReader;
use crate::error::Result;
use crate::repair::RepairStrategy;
use crate::source::Source;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::hash::encode_hex;
use depot_core::{Digest, Hasher};

/// Wraps a chunk stream with incremental digest validation.
///
/// Bytes flow through unmodified. A chunk pushing the stream past the
/// declared size terminates it immediately with a size-mismatch error;
/// bytes already delivered downstream are not retracted. On clean end of
/// stream the byte count and checksum are compared against the digest, the
/// source is notified of the outcome, and any mismatch triggers the repair
/// strategy.
pub(crate) struct ValidatingChunkReader {
    inner: Box<dyn ChunkReader>,
    digest: Digest,
    hasher: Option<Hasher>,
    bytes_seen: u64,
    repair: RepairStrategy,
    source: Source,
}

impl ValidatingChunkReader {
    pub(crate) fn new(
        inner: Box<dyn ChunkReader>,
        digest: &Digest,
        repair: RepairStrategy,
        source: Source,
    ) -> ValidatingChunkReader {
        ValidatingChunkReader {
            inner,
            hasher: Some(digest.hasher()),
            digest: digest.clone(),
            bytes_seen: 0,
            repair,
            source,
        }
    }
}

#[async_trait]
impl ChunkReader for ValidatingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        match self.inner.read().await? {
            Some(chunk) => {
                self.bytes_seen += chunk.len() as u64;
                if self.bytes_seen > self.digest.size_bytes() {
                    let err = self
                        .source
                        .notify_size_mismatch(self.digest.size_bytes(), self.bytes_seen);
                    self.repair.on_integrity_failure();
                    return Err(err);
                }
                if let Some(hasher) = &mut self.hasher {
                    hasher.update(&chunk);
                }
                Ok(Some(chunk))
            }
            None => {
                // Validation already ran on an earlier end-of-stream read.
                let Some(hasher) = self.hasher.take() else {
                    return Ok(None);
                };
                if self.bytes_seen != self.digest.size_bytes() {
                    let err = self
                        .source
                        .notify_size_mismatch(self.digest.size_bytes(), self.bytes_seen);
                    self.repair.on_integrity_failure();
                    return Err(err);
                }
                let actual = hasher.finalize();
                if actual != self.digest.hash_bytes() {
                    let err = self
                        .source
                        .notify_hash_mismatch(self.digest.hash_hex(), encode_hex(&actual));
                    self.repair.on_integrity_failure();
                    return Err(err);
                }
                self.source.notify_data_valid();
                Ok(None)
            }
        }
    }
}
