use bytes::Bytes;
use std::collections::VecDeque;

/// Byte cap for audio buffered while reconnecting.
///
/// 32 KiB is about 2 seconds of 16 kHz 16-bit mono audio. Bounded memory
/// takes precedence over completeness: when the cap is hit, the oldest
/// buffered audio is dropped to admit the newest.
pub const RECONNECT_BUFFER_CAP: usize = 32 * 1024;

/// Bounded FIFO of raw audio chunks, used only while a session has no live
/// upstream handle. Drained in arrival order for replay once a new handle
/// is installed.
#[derive(Debug)]
pub struct ReconnectionBuffer {
    chunks: VecDeque<Bytes>,
    len_bytes: usize,
    cap: usize,
}

impl ReconnectionBuffer {
    pub fn new() -> Self {
        Self::with_capacity(RECONNECT_BUFFER_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len_bytes: 0,
            cap,
        }
    }

    /// Append a chunk, evicting the oldest chunks until it fits.
    ///
    /// The newest data is always retained: a chunk larger than the whole
    /// capacity is truncated to its newest `cap` bytes. Returns the number
    /// of chunks evicted to make room.
    pub fn push(&mut self, chunk: Bytes) -> u64 {
        let chunk = if chunk.len() > self.cap {
            chunk.slice(chunk.len() - self.cap..)
        } else {
            chunk
        };

        let mut evicted = 0;
        while self.len_bytes + chunk.len() > self.cap {
            match self.chunks.pop_front() {
                Some(old) => {
                    self.len_bytes -= old.len();
                    evicted += 1;
                }
                None => break,
            }
        }

        self.len_bytes += chunk.len();
        self.chunks.push_back(chunk);
        evicted
    }

    /// Return all buffered chunks in original arrival order and clear the
    /// buffer.
    pub fn drain(&mut self) -> Vec<Bytes> {
        self.len_bytes = 0;
        self.chunks.drain(..).collect()
    }

    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }
}

impl Default for ReconnectionBuffer {
    fn default() -> Self {
        Self::new()
    }
}
