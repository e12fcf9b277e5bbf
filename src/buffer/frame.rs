//! Frame buffer
//!
//! Fixed-capacity storage for one JPEG frame. A buffer is owned by exactly
//! one party at a time (free pool, client loop, ready queue or consumer);
//! ownership moves with the value and the type is deliberately not `Clone`.

use std::time::SystemTime;

use bytes::{Bytes, BytesMut};

/// Reusable buffer holding one received frame
#[derive(Debug)]
pub struct FrameBuffer {
    /// Backing storage, always `capacity` bytes long
    data: BytesMut,
    /// Bytes written for the most recent frame
    used: usize,
    /// Capture time of the frame's first byte
    timestamp: SystemTime,
    /// Per-connection frame counter
    sequence: u64,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::zeroed(capacity),
            used: 0,
            timestamp: SystemTime::UNIX_EPOCH,
            sequence: 0,
        }
    }

    /// Allocate `count` buffers of `capacity` bytes each
    pub fn allocate(capacity: usize, count: usize) -> Vec<Self> {
        (0..count).map(|_| Self::new(capacity)).collect()
    }

    /// Fixed capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes of the current frame
    pub fn used(&self) -> usize {
        self.used
    }

    /// The current frame's bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.used]
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Sequence number within the connection the frame arrived on.
    ///
    /// Numbers advance for every received frame, including discarded ones,
    /// so gaps between consecutive buffers reveal dropped frames.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Copy the current frame out as shared bytes
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data())
    }

    /// Whole backing storage, for the frame reader to write into
    pub(crate) fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Record metadata of the frame just written
    pub(crate) fn stamp(&mut self, timestamp: SystemTime, used: usize, sequence: u64) {
        debug_assert!(used <= self.capacity());
        self.timestamp = timestamp;
        self.used = used;
        self.sequence = sequence;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_new_buffer() {
        let buf = FrameBuffer::new(2000);
        assert_eq!(buf.capacity(), 2000);
        assert_eq!(buf.used(), 0);
        assert!(buf.data().is_empty());
        assert_eq!(buf.sequence(), 0);
    }

    #[test]
    fn test_allocate() {
        let buffers = FrameBuffer::allocate(1024, 4);
        assert_eq!(buffers.len(), 4);
        assert!(buffers.iter().all(|b| b.capacity() == 1024));
    }

    #[test]
    fn test_stamp() {
        let mut buf = FrameBuffer::new(16);
        buf.storage_mut()[..3].copy_from_slice(b"abc");
        let ts = SystemTime::UNIX_EPOCH + Duration::from_secs(42);

        buf.stamp(ts, 3, 7);

        assert_eq!(buf.data(), b"abc");
        assert_eq!(buf.timestamp(), ts);
        assert_eq!(buf.sequence(), 7);
        assert_eq!(buf.to_bytes(), Bytes::from_static(b"abc"));
        // Capacity never changes
        assert_eq!(buf.capacity(), 16);
    }
}
