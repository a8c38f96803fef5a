//! Chunk-size normalization.

use crate::chunk_reader::ChunkReader;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Bounds on the sizes of chunks produced by a chunk reader.
///
/// Chunks smaller than `minimum` are concatenated and chunks larger than
/// `maximum` are split. A policy with `minimum == maximum` requests chunks
/// of exactly that size, except possibly the final one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPolicy {
    minimum: usize,
    maximum: usize,
}

impl ChunkPolicy {
    /// Create a policy. `minimum` must be at least 1 and no greater than
    /// `maximum`.
    pub fn new(minimum: usize, maximum: usize) -> Result<ChunkPolicy> {
        if minimum < 1 || maximum < minimum {
            return Err(Error::InvalidChunkPolicy { minimum, maximum });
        }
        Ok(ChunkPolicy { minimum, maximum })
    }

    /// A policy requesting chunks of exactly `size` bytes, except possibly
    /// the final chunk.
    pub fn exact(size: usize) -> Result<ChunkPolicy> {
        ChunkPolicy::new(size, size)
    }

    pub fn minimum(&self) -> usize {
        self.minimum
    }

    pub fn maximum(&self) -> usize {
        self.maximum
    }
}

/// Rechunks an arbitrary chunk stream to obey a chunk policy.
///
/// The byte sequence is preserved exactly, and conforming chunks pass
/// through without copying. Terminal errors are not altered.
pub(crate) struct NormalizingChunkReader {
    inner: Box<dyn ChunkReader>,
    policy: ChunkPolicy,
    pending: VecDeque<Bytes>,
    pending_bytes: usize,
    end_of_stream: bool,
}

impl NormalizingChunkReader {
    pub(crate) fn new(inner: Box<dyn ChunkReader>, policy: ChunkPolicy) -> NormalizingChunkReader {
        NormalizingChunkReader {
            inner,
            policy,
            pending: VecDeque::new(),
            pending_bytes: 0,
            end_of_stream: false,
        }
    }
}

#[async_trait]
impl ChunkReader for NormalizingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        while self.pending_bytes < self.policy.minimum() && !self.end_of_stream {
            match self.inner.read().await? {
                Some(chunk) => {
                    self.pending_bytes += chunk.len();
                    self.pending.push_back(chunk);
                }
                None => self.end_of_stream = true,
            }
        }
        if self.pending_bytes == 0 {
            return Ok(None);
        }

        let take = self.pending_bytes.min(self.policy.maximum());
        self.pending_bytes -= take;

        let front_len = self.pending.front().map(Bytes::len).unwrap_or(0);
        let chunk = if front_len == take {
            self.pending.pop_front().unwrap()
        } else if front_len > take {
            self.pending.front_mut().unwrap().split_to(take)
        } else {
            let mut out = BytesMut::with_capacity(take);
            let mut needed = take;
            while needed > 0 {
                let front = self.pending.front_mut().unwrap();
                if front.len() <= needed {
                    needed -= front.len();
                    out.extend_from_slice(front);
                    self.pending.pop_front();
                } else {
                    out.extend_from_slice(&front.split_to(needed));
                    needed = 0;
                }
            }
            out.freeze()
        };
        Ok(Some(chunk))
    }
}
