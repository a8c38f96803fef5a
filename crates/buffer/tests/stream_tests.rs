//! Behavior of buffers backed by streaming readers.

mod common;

use bytes::Bytes;
use common::{
    bytes_reader, hello_world_digest, recording_source, scripted_reader, storage_error,
    ScriptedChunkReader, HELLO_WORLD_MD5,
};
use depot_buffer::{Buffer, ChunkPolicy, ChunkReader, Error, RepairStrategy, Source};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

fn reader_buffer(data: &'static [u8]) -> Buffer {
    Buffer::new_cas_from_reader(
        &hello_world_digest(),
        bytes_reader(data),
        RepairStrategy::irreparable(),
        Source::user_provided(),
    )
}

#[tokio::test]
async fn test_reader_to_bytes() {
    let (source, record) = recording_source();
    let buffer = Buffer::new_cas_from_reader(
        &hello_world_digest(),
        bytes_reader(b"Hello world"),
        RepairStrategy::irreparable(),
        source,
    );
    assert_eq!(
        buffer.to_bytes(1000).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
    assert_eq!(record.data_valid(), 1);
}

#[tokio::test]
async fn test_chunk_reader_to_bytes() {
    let (reader, probe) = ScriptedChunkReader::delivering(&[b"Hello ", b"world"]);
    let (source, record) = recording_source();
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        source,
    );
    assert_eq!(
        buffer.to_bytes(1000).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
    assert_eq!(record.data_valid(), 1);
    assert!(probe.dropped());
}

#[tokio::test]
async fn test_stream_to_bytes() {
    let stream: depot_buffer::ByteStream = Box::pin(futures::stream::iter(vec![
        Ok(Bytes::from_static(b"Hello ")),
        Ok(Bytes::from_static(b"world")),
    ]));
    let buffer = Buffer::new_cas_from_stream(
        &hello_world_digest(),
        stream,
        RepairStrategy::irreparable(),
        Source::user_provided(),
    );
    assert_eq!(
        buffer.to_bytes(1000).await.unwrap(),
        Bytes::from_static(b"Hello world")
    );
}

#[tokio::test]
async fn test_size_bytes_does_not_consume() {
    let (reader, probe) = ScriptedChunkReader::delivering(&[b"Hello world"]);
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        Source::user_provided(),
    );
    assert_eq!(buffer.size_bytes().unwrap(), 11);
    assert_eq!(probe.reads(), 0);
    buffer.discard();
    assert!(probe.dropped());
}

#[tokio::test]
async fn test_into_writer() {
    let mut writer = Vec::new();
    reader_buffer(b"Hello world")
        .into_writer(&mut writer)
        .await
        .unwrap();
    assert_eq!(writer, b"Hello world");
}

#[tokio::test]
async fn test_read_at_discards_fills_and_drains() {
    let (source, record) = recording_source();
    let buffer = Buffer::new_cas_from_reader(
        &hello_world_digest(),
        bytes_reader(b"Hello world"),
        RepairStrategy::irreparable(),
        source,
    );
    let mut out = [0u8; 5];
    let n = buffer.read_at(&mut out, 6).await.unwrap();
    assert_eq!(n, 5);
    assert_eq!(&out, b"world");
    // The remainder was drained, so the whole stream was validated.
    assert_eq!(record.data_valid(), 1);
}

#[tokio::test]
async fn test_read_at_validates_corrupted_tail() {
    // The requested bytes are correct, but the tail is corrupted: the read
    // must fail anyway, because validation covers the whole stream.
    let buffer = reader_buffer(b"Hello wrold");
    let mut out = [0u8; 2];
    let err = buffer.read_at(&mut out, 2).await.unwrap_err();
    match err {
        Error::HashMismatch { expected, .. } => assert_eq!(expected, HELLO_WORLD_MD5),
        other => panic!("expected a hash mismatch, got: {other}"),
    }
}

#[tokio::test]
async fn test_read_at_past_end() {
    let mut out = [0u8; 4];
    let n = reader_buffer(b"Hello world")
        .read_at(&mut out, 20)
        .await
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_to_bytes_maximum_size_skips_reading() {
    let (reader, probe) = ScriptedChunkReader::delivering(&[b"Hello world"]);
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        Source::user_provided(),
    );
    assert_eq!(
        buffer.to_bytes(5).await.unwrap_err().to_string(),
        "Buffer is 11 bytes in size, while a maximum of 5 bytes is permitted"
    );
    assert_eq!(probe.reads(), 0);
    assert!(probe.dropped());
}

#[tokio::test]
async fn test_short_stream_size_mismatch() {
    let (reader, _probe) = ScriptedChunkReader::delivering(&[b"Hello"]);
    let (source, record) = recording_source();
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        source,
    );
    assert_eq!(
        buffer.to_bytes(1000).await.unwrap_err().to_string(),
        "Buffer is 5 bytes in size, while 11 bytes were expected"
    );
    assert_eq!(record.size_mismatch(), 1);
    assert_eq!(record.data_valid(), 0);
}

#[tokio::test]
async fn test_overlong_stream_size_mismatch() {
    let (reader, _probe) = ScriptedChunkReader::delivering(&[b"Hello world!"]);
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        Source::user_provided(),
    );
    assert_eq!(
        buffer.to_bytes(1000).await.unwrap_err().to_string(),
        "Buffer is 12 bytes in size, while 11 bytes were expected"
    );
}

#[tokio::test]
async fn test_transport_errors_surface_verbatim() {
    let (reader, _probe) =
        ScriptedChunkReader::failing_after(&[b"Hello "], storage_error("Connection closed"));
    let (source, record) = recording_source();
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        source,
    );
    assert_eq!(
        buffer.to_bytes(1000).await.unwrap_err(),
        storage_error("Connection closed")
    );
    // Transport failures are not integrity outcomes.
    assert_eq!(record.data_valid(), 0);
    assert_eq!(record.size_mismatch(), 0);
    assert_eq!(record.hash_mismatch(), 0);
}

#[tokio::test]
async fn test_into_chunk_reader_rechunks() {
    let (reader, _probe) = ScriptedChunkReader::delivering(&[b"He", b"llo wor", b"ld"]);
    let (source, record) = recording_source();
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        source,
    );
    let mut chunks = buffer.into_chunk_reader(0, ChunkPolicy::exact(3).unwrap());
    let mut collected = Vec::new();
    while let Some(chunk) = chunks.read().await.unwrap() {
        collected.push(chunk);
    }
    assert_eq!(
        collected,
        vec![
            Bytes::from_static(b"Hel"),
            Bytes::from_static(b"lo "),
            Bytes::from_static(b"wor"),
            Bytes::from_static(b"ld"),
        ]
    );
    assert_eq!(record.data_valid(), 1);
}

#[tokio::test]
async fn test_into_chunk_reader_at_offset_still_validates_prefix() {
    let (source, record) = recording_source();
    let buffer = Buffer::new_cas_from_reader(
        &hello_world_digest(),
        bytes_reader(b"Hello world"),
        RepairStrategy::irreparable(),
        source,
    );
    let mut chunks = buffer.into_chunk_reader(6, ChunkPolicy::new(1, 100).unwrap());
    assert_eq!(
        chunks.read().await.unwrap(),
        Some(Bytes::from_static(b"world"))
    );
    assert_eq!(chunks.read().await.unwrap(), None);
    // The skipped prefix was hashed, so the digest check still ran.
    assert_eq!(record.data_valid(), 1);
}

#[tokio::test]
async fn test_into_reader() {
    let mut reader = reader_buffer(b"Hello world").into_reader();
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await.unwrap();
    assert_eq!(data, b"Hello world");
}

#[tokio::test]
async fn test_into_reader_reports_typed_errors() {
    let mut reader = reader_buffer(b"Xyzzy world").into_reader();
    let mut data = Vec::new();
    let err = reader.read_to_end(&mut data).await.unwrap_err();
    match Error::from_io_error(err) {
        Error::HashMismatch { expected, .. } => assert_eq!(expected, HELLO_WORLD_MD5),
        other => panic!("expected a hash mismatch, got: {other}"),
    }
}

#[tokio::test]
async fn test_reader_error_passthrough() {
    let buffer = Buffer::new_cas_from_reader(
        &hello_world_digest(),
        scripted_reader(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Err(storage_error("Connection reset by peer")),
        ]),
        RepairStrategy::irreparable(),
        Source::user_provided(),
    );
    assert_eq!(
        buffer.to_bytes(1000).await.unwrap_err(),
        storage_error("Connection reset by peer")
    );
}

#[tokio::test]
async fn test_discard_releases_stream_without_reading() {
    let (reader, probe) = ScriptedChunkReader::delivering(&[b"Hello world"]);
    let buffer = Buffer::new_cas_from_chunk_reader(
        &hello_world_digest(),
        reader,
        RepairStrategy::irreparable(),
        Source::user_provided(),
    );
    buffer.discard();
    assert!(probe.dropped());
    assert_eq!(probe.reads(), 0);
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct ActionOutcome {
    exit_code: i32,
}

#[tokio::test]
async fn test_cas_to_message() {
    let message = ActionOutcome { exit_code: 7 };
    let data = Bytes::from(serde_json::to_vec(&message).unwrap());
    let digest = hello_world_digest().function().compute_digest(&data);
    let buffer = Buffer::new_cas_from_reader(
        &digest,
        scripted_reader(vec![Ok(data)]),
        RepairStrategy::irreparable(),
        Source::user_provided(),
    );
    assert_eq!(
        buffer.to_message::<ActionOutcome>(1000).await.unwrap(),
        message
    );
}
