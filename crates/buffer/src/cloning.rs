//! The stream-clone coordinator.

use crate::buffer::Buffer;
use crate::chunk_reader::{ChunkReader, SkippingChunkReader};
use crate::error::{Error, Result};
use crate::repair::RepairStrategy;
use crate::source::Source;
use crate::validating::ValidatingChunkReader;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::Digest;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Number of chunks a stream-clone follower may fall behind before the
/// producer blocks.
const RING_CAPACITY: usize = 16;

/// A delivered chunk, a clean end-of-stream marker, or the terminal error.
type CloneEvent = Result<Option<Bytes>>;

/// Split a stream-backed buffer into two buffers that consume the same
/// source without reading it twice.
///
/// Whichever half runs a terminal operation first claims the producer
/// role: it drives the source's stream and tees every chunk, plus the
/// terminal outcome, into the other half's bounded ring. The other half
/// replays from its ring. A validating producer checks the object once
/// and both halves observe its outcome; a producer claimed through the
/// unvalidated entry point leaves the follower to validate its replay, so
/// each half's byte sequence is still hashed exactly once.
pub(crate) fn new_clone_stream_pair(source: Buffer) -> (Buffer, Buffer) {
    let (digest, repair, integrity_source) = source
        .stream_parts()
        .expect("stream-backed buffers carry a digest");
    let (sender_a, receiver_a) = mpsc::channel(RING_CAPACITY);
    let (sender_b, receiver_b) = mpsc::channel(RING_CAPACITY);
    let shared = Arc::new(CloneShared {
        state: Mutex::new(CloneState {
            source: Some(source),
            senders: [Some(sender_a), Some(sender_b)],
            producer_validated: true,
        }),
    });
    let a = CloneStreamConsumer {
        shared: shared.clone(),
        receiver: receiver_a,
        index: 0,
        digest: digest.clone(),
        repair: repair.clone(),
        source: integrity_source.clone(),
    };
    let b = CloneStreamConsumer {
        shared,
        receiver: receiver_b,
        index: 1,
        digest,
        repair,
        source: integrity_source,
    };
    (Buffer::from_cloned_stream(a), Buffer::from_cloned_stream(b))
}

struct CloneShared {
    state: Mutex<CloneState>,
}

struct CloneState {
    source: Option<Buffer>,
    senders: [Option<mpsc::Sender<CloneEvent>>; 2],
    /// Whether the claimed producer drives the source's validating stream.
    /// A producer claimed through the unvalidated entry point (a retry
    /// wrapper hashing the stitched stream above it) forwards unvalidated
    /// chunks, and the follower validates its replay itself.
    producer_validated: bool,
}

/// One half of a stream-cloned buffer pair.
///
/// Each half owns the receiving side of its ring, so discarding a half
/// closes its ring and the producer carries on as sole owner. A ring that
/// closes without a terminal marker means the producer was dropped before
/// the stream completed, which the follower reports as an error.
pub(crate) struct CloneStreamConsumer {
    shared: Arc<CloneShared>,
    receiver: mpsc::Receiver<CloneEvent>,
    index: usize,
    digest: Digest,
    repair: RepairStrategy,
    source: Source,
}

impl CloneStreamConsumer {
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

    /// The consumer's stream with validation guaranteed: either performed
    /// by the producer role, or applied to the replay when the producer
    /// was claimed unvalidated.
    pub(crate) fn into_validated_chunk_reader(self, offset_bytes: u64) -> Box<dyn ChunkReader> {
        self.into_role_chunk_reader(offset_bytes, true)
    }

    /// The consumer's stream without an additional validating layer, for
    /// call sites that hash the delivered sequence themselves.
    pub(crate) fn into_unvalidated_chunk_reader(self, offset_bytes: u64) -> Box<dyn ChunkReader> {
        self.into_role_chunk_reader(offset_bytes, false)
    }

    fn into_role_chunk_reader(self, offset_bytes: u64, validated: bool) -> Box<dyn ChunkReader> {
        let CloneStreamConsumer {
            shared,
            receiver,
            index,
            digest,
            repair,
            source: integrity_source,
        } = self;
        let reader: Box<dyn ChunkReader> = {
            let mut state = shared.state.lock().unwrap();
            if let Some(source) = state.source.take() {
                state.senders[index] = None;
                state.producer_validated = validated;
                let peer = state.senders[1 - index].take();
                drop(state);
                let inner = if validated {
                    source.into_raw_chunk_reader(0)
                } else {
                    source.into_unvalidated_chunk_reader(0)
                };
                Box::new(TeeChunkReader {
                    inner,
                    peer,
                    terminal_sent: false,
                })
            } else {
                let producer_validated = state.producer_validated;
                drop(state);
                let replay = Box::new(FollowerChunkReader {
                    receiver,
                    terminal: None,
                });
                if validated && !producer_validated {
                    Box::new(ValidatingChunkReader::new(
                        replay,
                        &digest,
                        repair,
                        integrity_source,
                    ))
                } else {
                    replay
                }
            }
        };
        if offset_bytes == 0 {
            reader
        } else {
            Box::new(SkippingChunkReader::new(reader, offset_bytes))
        }
    }
}

/// The producer role: reads the source once, forwarding everything it
/// observes into the follower's ring. Forwarding blocks when the follower
/// falls behind by the ring bound; a closed ring means the follower was
/// discarded, after which forwarding stops.
struct TeeChunkReader {
    inner: Box<dyn ChunkReader>,
    peer: Option<mpsc::Sender<CloneEvent>>,
    terminal_sent: bool,
}

#[async_trait]
impl ChunkReader for TeeChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        let result = self.inner.read().await;
        if !self.terminal_sent {
            if let Some(peer) = self.peer.clone() {
                let event = match &result {
                    Ok(Some(chunk)) => Ok(Some(chunk.clone())),
                    Ok(None) => {
                        self.terminal_sent = true;
                        Ok(None)
                    }
                    Err(err) => {
                        self.terminal_sent = true;
                        Err(err.clone())
                    }
                };
                if peer.send(event).await.is_err() {
                    self.peer = None;
                }
            }
        }
        result
    }
}

/// The follower role: replays chunks and the terminal outcome recorded by
/// the producer.
struct FollowerChunkReader {
    receiver: mpsc::Receiver<CloneEvent>,
    terminal: Option<CloneEvent>,
}

#[async_trait]
impl ChunkReader for FollowerChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }
        let event = match self.receiver.recv().await {
            Some(Ok(Some(chunk))) => return Ok(Some(chunk)),
            Some(event) => event,
            None => Err(Error::Storage(
                "Cloned buffer was discarded before the stream completed".to_string(),
            )),
        };
        self.terminal = Some(event.clone());
        event
    }
}
