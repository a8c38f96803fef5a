//! Shared test doubles for buffer behavior tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use depot_buffer::{Buffer, ChunkReader, DataIntegrityListener, Error, ErrorHandler, Source};
use depot_core::Digest;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// MD5 of `"Hello world"`.
pub const HELLO_WORLD_MD5: &str = "3e25960a79dbc69b674cd4ec67a72c62";

/// MD5 of `"Xyzzy world"`.
pub const XYZZY_WORLD_MD5: &str = "3c61ab3f7343f99e0d18e0a7dfb3b0ce";

pub fn hello_world_digest() -> Digest {
    Digest::new("instance", HELLO_WORLD_MD5, 11).unwrap()
}

pub fn storage_error(message: &str) -> Error {
    Error::Storage(message.to_string())
}

/// Counts the integrity notifications a source delivered.
#[derive(Default)]
pub struct IntegrityRecord {
    pub data_valid: AtomicUsize,
    pub size_mismatch: AtomicUsize,
    pub hash_mismatch: AtomicUsize,
    pub parse_failure: AtomicUsize,
}

impl IntegrityRecord {
    pub fn data_valid(&self) -> usize {
        self.data_valid.load(Ordering::SeqCst)
    }
    pub fn size_mismatch(&self) -> usize {
        self.size_mismatch.load(Ordering::SeqCst)
    }
    pub fn hash_mismatch(&self) -> usize {
        self.hash_mismatch.load(Ordering::SeqCst)
    }
    pub fn parse_failure(&self) -> usize {
        self.parse_failure.load(Ordering::SeqCst)
    }
}

struct RecordingListener(Arc<IntegrityRecord>);

impl DataIntegrityListener for RecordingListener {
    fn data_valid(&self) {
        self.0.data_valid.fetch_add(1, Ordering::SeqCst);
    }
    fn size_mismatch(&self, _expected_size_bytes: u64, _actual_size_bytes: u64) {
        self.0.size_mismatch.fetch_add(1, Ordering::SeqCst);
    }
    fn hash_mismatch(&self, _expected: &str, _actual: &str) {
        self.0.hash_mismatch.fetch_add(1, Ordering::SeqCst);
    }
    fn parse_failure(&self, _reason: &str) {
        self.0.parse_failure.fetch_add(1, Ordering::SeqCst);
    }
}

/// A backend-provided source that records every notification it receives.
pub fn recording_source() -> (Source, Arc<IntegrityRecord>) {
    let record = Arc::new(IntegrityRecord::default());
    (
        Source::backend_provided(RecordingListener(record.clone())),
        record,
    )
}

/// Observes how a scripted reader was used after it has been moved into a
/// buffer.
pub struct ScriptProbe {
    reads: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl ScriptProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Chunk reader that replays a fixed script of read results. Once the
/// script is exhausted it reports end of stream.
pub struct ScriptedChunkReader {
    script: VecDeque<Result<Option<Bytes>, Error>>,
    reads: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedChunkReader {
    pub fn new(
        script: Vec<Result<Option<Bytes>, Error>>,
    ) -> (Box<ScriptedChunkReader>, ScriptProbe) {
        let reads = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        (
            Box::new(ScriptedChunkReader {
                script: script.into(),
                reads: reads.clone(),
                dropped: dropped.clone(),
            }),
            ScriptProbe { reads, dropped },
        )
    }

    /// A script delivering the given chunks followed by a clean end of
    /// stream.
    pub fn delivering(parts: &[&'static [u8]]) -> (Box<ScriptedChunkReader>, ScriptProbe) {
        let mut script: Vec<Result<Option<Bytes>, Error>> = parts
            .iter()
            .map(|part| Ok(Some(Bytes::from_static(part))))
            .collect();
        script.push(Ok(None));
        ScriptedChunkReader::new(script)
    }

    /// A script delivering the given chunks and then failing.
    pub fn failing_after(
        parts: &[&'static [u8]],
        err: Error,
    ) -> (Box<ScriptedChunkReader>, ScriptProbe) {
        let mut script: Vec<Result<Option<Bytes>, Error>> = parts
            .iter()
            .map(|part| Ok(Some(Bytes::from_static(part))))
            .collect();
        script.push(Err(err));
        ScriptedChunkReader::new(script)
    }
}

#[async_trait]
impl ChunkReader for ScriptedChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.script.pop_front().unwrap_or(Ok(None))
    }
}

impl Drop for ScriptedChunkReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Byte reader that yields the scripted events in order.
pub fn scripted_reader(events: Vec<Result<Bytes, Error>>) -> Box<dyn AsyncRead + Send + Unpin> {
    let stream =
        futures::stream::iter(events.into_iter().map(|event| event.map_err(Error::into_io_error)));
    Box::new(StreamReader::new(stream))
}

/// Byte reader over an in-memory slice.
pub fn bytes_reader(data: &'static [u8]) -> Box<dyn AsyncRead + Send + Unpin> {
    scripted_reader(vec![Ok(Bytes::from_static(data))])
}

/// Error handler that checks each observed error against a script and
/// replies with the scripted outcome. `done` invocations are counted.
pub struct ScriptedErrorHandler {
    script: VecDeque<(String, Result<Buffer, Error>)>,
    done_count: Arc<AtomicUsize>,
}

impl ScriptedErrorHandler {
    pub fn new(
        script: Vec<(&str, Result<Buffer, Error>)>,
    ) -> (Box<ScriptedErrorHandler>, Arc<AtomicUsize>) {
        let done_count = Arc::new(AtomicUsize::new(0));
        (
            Box::new(ScriptedErrorHandler {
                script: script
                    .into_iter()
                    .map(|(expected, outcome)| (expected.to_string(), outcome))
                    .collect(),
                done_count: done_count.clone(),
            }),
            done_count,
        )
    }
}

impl ErrorHandler for ScriptedErrorHandler {
    fn on_error(&mut self, err: Error) -> Result<Buffer, Error> {
        let (expected, outcome) = self
            .script
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected error: {err}"));
        assert_eq!(err.to_string(), expected);
        outcome
    }

    fn done(&mut self) {
        self.done_count.fetch_add(1, Ordering::SeqCst);
    }
}
