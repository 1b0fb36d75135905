// Integration tests for the reconnection buffer
//
// The buffer parks audio while a session is reconnecting; these tests pin
// down the cap, the oldest-first eviction order, and drain semantics.

use bytes::Bytes;
use voice_gateway::session::{ReconnectionBuffer, RECONNECT_BUFFER_CAP};

#[test]
fn test_buffer_preserves_arrival_order() {
    let mut buffer = ReconnectionBuffer::new();
    for i in 0..5u8 {
        assert_eq!(buffer.push(Bytes::from(vec![i; 100])), 0);
    }
    assert_eq!(buffer.len_bytes(), 500);

    let drained = buffer.drain();
    assert_eq!(drained.len(), 5);
    for (i, chunk) in drained.iter().enumerate() {
        assert_eq!(chunk, &Bytes::from(vec![i as u8; 100]));
    }
    assert_eq!(buffer.len_bytes(), 0);
}

#[test]
fn test_buffer_never_exceeds_cap() {
    let mut buffer = ReconnectionBuffer::new();
    let chunk_len = 3_000;
    for i in 0..20u8 {
        buffer.push(Bytes::from(vec![i; chunk_len]));
        assert!(buffer.len_bytes() <= RECONNECT_BUFFER_CAP);
    }
}

#[test]
fn test_overflow_evicts_oldest_keeps_newest() {
    let mut buffer = ReconnectionBuffer::new();
    let chunk_len = 10_000; // three fit, the fourth forces an eviction
    for i in 0..3u8 {
        assert_eq!(buffer.push(Bytes::from(vec![i; chunk_len])), 0);
    }
    let evicted = buffer.push(Bytes::from(vec![3u8; chunk_len]));
    assert_eq!(evicted, 1);

    let drained = buffer.drain();
    let ids: Vec<u8> = drained.iter().map(|c| c[0]).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_oversized_chunk_is_truncated_to_newest_bytes() {
    let mut buffer = ReconnectionBuffer::new();
    buffer.push(Bytes::from(vec![0u8; 1_000]));

    // A single chunk larger than the whole buffer displaces everything and
    // keeps only its own newest bytes
    let mut giant = vec![0u8; RECONNECT_BUFFER_CAP + 500];
    for (i, b) in giant.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let tail = Bytes::copy_from_slice(&giant[500..]);
    buffer.push(Bytes::from(giant));

    assert_eq!(buffer.len_bytes(), RECONNECT_BUFFER_CAP);
    let drained = buffer.drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0], tail);
}

#[test]
fn test_drain_on_empty_buffer() {
    let mut buffer = ReconnectionBuffer::new();
    assert!(buffer.drain().is_empty());
    assert_eq!(buffer.len_bytes(), 0);
}
