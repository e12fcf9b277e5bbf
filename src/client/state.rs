//! Client state shared by both execution adapters
//!
//! The connect → read loop → reconnect cycle is written twice, once with
//! blocking calls on a worker thread ([`super::threaded`]) and once as a tokio
//! task ([`super::task`]). Everything those loops decide besides I/O lives
//! here, so both behave identically:
//!
//! ```text
//!   Closed ──open()──► Connecting ──200 + boundary──► Streaming
//!      ▲                   ▲                              │ end of stream / error
//!      │                   └──── reconnect_interval ──── Reconnecting
//!      └──── stop requested or reconnect limit reached ───────┘
//! ```
//!
//! Counters are written only by the loop; readers get a consistent snapshot
//! because every field is read under the same lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::watch;

use crate::buffer::{BufferPool, FrameBuffer};
use crate::error::Error;
use crate::protocol::FrameInfo;
use crate::stats::{FpsMeter, StreamStats};

use super::config::ClientConfig;

/// Client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not running
    Closed,
    /// Opening a connection and negotiating the boundary
    Connecting,
    /// Reading frames
    Streaming,
    /// Waiting `reconnect_interval` before the next attempt
    Reconnecting,
}

/// Last error seen by the background loop, if any
pub type LastError = Option<Arc<Error>>;

#[derive(Debug)]
struct LoopState {
    state: ClientState,
    stats: StreamStats,
    fps: FpsMeter,
}

/// Per-connection counters
#[derive(Debug, Default)]
pub(crate) struct Session {
    sequence: u64,
}

impl Session {
    fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }
}

/// Reconnect attempts left within one `open()` run
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReconnectBudget {
    limit: Option<u32>,
    used: u32,
}

impl ReconnectBudget {
    pub(crate) fn new(limit: Option<u32>) -> Self {
        Self { limit, used: 0 }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.used >= limit)
    }

    pub(crate) fn spend(&mut self) {
        self.used += 1;
    }
}

/// State shared between the client handle, the loop and observers
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) pool: Arc<BufferPool>,
    inner: Mutex<LoopState>,
    last_error: watch::Sender<LastError>,
}

impl Shared {
    pub(crate) fn new(config: &ClientConfig) -> Self {
        let (last_error, _) = watch::channel(None);
        // Nothing is published before the first run
        let pool = BufferPool::new();
        pool.seal();
        Self {
            pool: Arc::new(pool),
            inner: Mutex::new(LoopState {
                state: ClientState::Closed,
                stats: StreamStats::new(config.url.clone()),
                fps: FpsMeter::new(config.log_interval, Instant::now()),
            }),
            last_error,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ClientState {
        self.lock().state
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        self.lock().state = state;
    }

    /// Consistent copy of all counters
    pub(crate) fn snapshot(&self) -> StreamStats {
        let mut stats = self.lock().stats.clone();
        stats.free_buffers = self.pool.free_len();
        stats
    }

    /// A new run starts; it will deliver exactly one close sentinel
    pub(crate) fn begin_run(&self) {
        self.pool.reopen();
    }

    /// A run that never started owes no sentinel
    pub(crate) fn cancel_run(&self) {
        self.pool.seal();
    }

    /// Enter `Connecting` for a fresh attempt
    pub(crate) fn begin_connection(&self) -> Session {
        self.clear_error();
        let mut inner = self.lock();
        inner.state = ClientState::Connecting;
        inner.fps.restart(Instant::now());
        Session::default()
    }

    /// Take a buffer for the next frame, tracking the overrun latch.
    ///
    /// The overrun counter only moves on the transition into overrun, so a
    /// long run of frames without a free buffer counts once.
    pub(crate) fn acquire(&self) -> Option<FrameBuffer> {
        let buffer = self.pool.acquire_free();
        let mut inner = self.lock();
        let stats = &mut inner.stats;

        if buffer.is_some() {
            stats.in_overrun = false;
        } else if !stats.in_overrun {
            stats.in_overrun = true;
            stats.overruns += 1;
            tracing::warn!(
                url = %stats.url,
                overruns = stats.overruns,
                "No free buffer, discarding frames"
            );
        }

        buffer
    }

    /// Account for a frame that was read and publish it if it was stored.
    ///
    /// A frame read after the close sentinel went out is dropped and its
    /// buffer returned to the free list. Publishing happens under the loop
    /// lock (loop state, then pool) so the counters match the queue.
    pub(crate) fn complete(&self, session: &mut Session, buffer: Option<FrameBuffer>, info: FrameInfo) {
        let sequence = session.next_sequence();
        let mut inner = self.lock();

        if let Some(fps) = inner.fps.record(Instant::now()) {
            inner.stats.fps = fps;
            tracing::debug!(fps = fps, frames = inner.stats.frames, "Frame rate updated");
        }

        let mut buffer = match buffer {
            Some(buffer) if buffer.capacity() >= info.length => buffer,
            other => {
                inner.stats.frames += 1;
                inner.stats.discarded_frames += 1;
                if let Some(buffer) = other {
                    tracing::debug!(
                        length = info.length,
                        capacity = buffer.capacity(),
                        "Frame larger than buffer, discarded"
                    );
                    self.pool.release(buffer);
                }
                return;
            }
        };

        buffer.stamp(info.timestamp, info.length, sequence);
        match self.pool.publish(buffer) {
            Ok(()) => {
                inner.stats.frames += 1;
                tracing::trace!(sequence = sequence, length = info.length, "Frame received");
            }
            Err(buffer) => {
                tracing::trace!(sequence = sequence, "Client closed, frame dropped");
                self.pool.release(buffer);
            }
        }
    }

    /// Return a buffer whose frame was not completed
    pub(crate) fn abandon(&self, buffer: Option<FrameBuffer>) {
        if let Some(buffer) = buffer {
            self.pool.release(buffer);
        }
    }

    pub(crate) fn note_reconnect(&self) {
        self.lock().stats.reconnects += 1;
    }

    pub(crate) fn record_error(&self, error: Error) {
        self.last_error.send_replace(Some(Arc::new(error)));
    }

    /// Forget a stale error, notifying observers only if there was one
    pub(crate) fn clear_error(&self) {
        self.last_error.send_if_modified(|last| last.take().is_some());
    }

    pub(crate) fn last_error(&self) -> LastError {
        self.last_error.borrow().clone()
    }

    pub(crate) fn subscribe_errors(&self) -> watch::Receiver<LastError> {
        self.last_error.subscribe()
    }

    /// Queue the close sentinel if this run has not delivered it yet
    pub(crate) fn deliver_close(&self) {
        if self.pool.close() {
            tracing::trace!("Close sentinel queued");
        }
    }

    /// The loop exited: settle in `Closed` and release waiters.
    ///
    /// The last error stays readable; watchers are woken so they see the exit.
    pub(crate) fn finish_run(&self) {
        self.set_state(ClientState::Closed);
        self.deliver_close();
        self.last_error.send_modify(|_| {});
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn shared_with_buffers(capacity: usize, count: usize) -> Shared {
        let shared = Shared::new(&ClientConfig::new("http://cam/stream"));
        for buffer in FrameBuffer::allocate(capacity, count) {
            shared.pool.release(buffer);
        }
        shared.begin_run();
        shared
    }

    fn info(length: usize) -> FrameInfo {
        FrameInfo {
            timestamp: SystemTime::now(),
            length,
        }
    }

    #[test]
    fn test_overrun_counted_once_per_run() {
        let shared = shared_with_buffers(100, 0);
        let mut session = shared.begin_connection();

        for _ in 0..5 {
            let buffer = shared.acquire();
            assert!(buffer.is_none());
            shared.complete(&mut session, buffer, info(10));
        }

        let stats = shared.snapshot();
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.discarded_frames, 5);
        assert_eq!(stats.frames, 5);
        assert!(stats.in_overrun);

        // A returned buffer ends the overrun; the next shortage counts again
        shared.pool.release(FrameBuffer::new(100));
        let buffer = shared.acquire();
        assert!(!shared.snapshot().in_overrun);
        shared.complete(&mut session, buffer, info(10));
        shared.pool.consume_timeout(std::time::Duration::ZERO);

        assert!(shared.acquire().is_none());
        assert_eq!(shared.snapshot().overruns, 2);
    }

    #[test]
    fn test_complete_publishes_with_sequence() {
        let shared = shared_with_buffers(2000, 2);
        let mut session = shared.begin_connection();

        let buffer = shared.acquire();
        shared.complete(&mut session, buffer, info(1000));
        let buffer = shared.acquire();
        shared.complete(&mut session, buffer, info(10));

        let first = shared.pool.consume().unwrap();
        let second = shared.pool.consume().unwrap();
        assert_eq!(first.used(), 1000);
        assert_eq!(first.sequence(), 0);
        assert_eq!(second.used(), 10);
        assert_eq!(second.sequence(), 1);

        let stats = shared.snapshot();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.delivered_frames(), 2);
    }

    #[test]
    fn test_too_small_buffer_discarded_and_recycled() {
        let shared = shared_with_buffers(500, 1);
        let mut session = shared.begin_connection();

        let buffer = shared.acquire();
        shared.complete(&mut session, buffer, info(1000));

        let stats = shared.snapshot();
        assert_eq!(stats.discarded_frames, 1);
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.overruns, 0);
        // Buffer went back to the free pool untouched
        assert_eq!(stats.free_buffers, 1);
        assert_eq!(shared.pool.ready_len(), 0);
        assert_eq!(shared.pool.acquire_free().unwrap().used(), 0);
    }

    #[test]
    fn test_sequence_advances_for_discarded_frames() {
        let shared = shared_with_buffers(100, 0);
        let mut session = shared.begin_connection();

        shared.complete(&mut session, None, info(10));
        shared.pool.release(FrameBuffer::new(100));
        let buffer = shared.acquire();
        shared.complete(&mut session, buffer, info(10));

        assert_eq!(shared.pool.consume().unwrap().sequence(), 1);

        // New connection starts over
        let mut session = shared.begin_connection();
        shared.pool.release(FrameBuffer::new(100));
        let buffer = shared.acquire();
        shared.complete(&mut session, buffer, info(10));
        assert_eq!(shared.pool.consume().unwrap().sequence(), 0);
    }

    #[test]
    fn test_abandon_returns_buffer() {
        let shared = shared_with_buffers(100, 1);
        let buffer = shared.acquire();
        assert_eq!(shared.pool.free_len(), 0);

        shared.abandon(buffer);
        assert_eq!(shared.pool.free_len(), 1);
        assert_eq!(shared.snapshot().frames, 0);
    }

    #[test]
    fn test_close_delivered_once_per_run() {
        let shared = shared_with_buffers(100, 0);

        shared.deliver_close();
        shared.finish_run();

        assert_eq!(shared.pool.ready_len(), 1);
        assert_eq!(shared.state(), ClientState::Closed);
    }

    #[test]
    fn test_no_sentinel_before_first_run() {
        let shared = Shared::new(&ClientConfig::new("http://cam/stream"));
        shared.deliver_close();
        assert_eq!(shared.pool.ready_len(), 0);

        shared.begin_run();
        shared.cancel_run();
        shared.deliver_close();
        assert_eq!(shared.pool.ready_len(), 0);
    }

    #[test]
    fn test_frame_after_close_returns_buffer() {
        let shared = shared_with_buffers(100, 2);
        let mut session = shared.begin_connection();

        let buffer = shared.acquire();
        shared.complete(&mut session, buffer, info(10));
        let late = shared.acquire();
        shared.deliver_close();
        shared.complete(&mut session, late, info(10));

        // Frame, then the sentinel, nothing behind it
        assert_eq!(shared.pool.ready_len(), 2);
        assert_eq!(shared.pool.free_len(), 1);
        assert!(shared.pool.consume().is_some());
        assert!(shared.pool.consume().is_none());
        assert_eq!(shared.snapshot().frames, 1);
    }

    #[test]
    fn test_error_kept_after_run() {
        let shared = shared_with_buffers(100, 0);
        let mut errors = shared.subscribe_errors();

        shared.record_error(Error::ConnectionClosed);
        errors.borrow_and_update();
        shared.finish_run();

        // Watchers wake on exit and still see the cause
        assert!(errors.has_changed().unwrap());
        assert!(matches!(
            errors.borrow_and_update().as_deref(),
            Some(Error::ConnectionClosed)
        ));
        assert!(shared.last_error().is_some());
    }

    #[test]
    fn test_error_slot() {
        let shared = shared_with_buffers(100, 0);
        let mut errors = shared.subscribe_errors();
        assert!(shared.last_error().is_none());

        shared.record_error(Error::ConnectionClosed);
        assert!(errors.has_changed().unwrap());
        assert!(matches!(
            shared.last_error().as_deref(),
            Some(Error::ConnectionClosed)
        ));
        errors.borrow_and_update();

        // A fresh attempt clears it
        shared.begin_connection();
        assert!(shared.last_error().is_none());
        assert!(errors.has_changed().unwrap());
        errors.borrow_and_update();

        // Clearing an empty slot is silent
        shared.clear_error();
        assert!(!errors.has_changed().unwrap());
    }

    #[test]
    fn test_reconnect_budget() {
        let mut budget = ReconnectBudget::new(Some(2));
        assert!(!budget.exhausted());
        budget.spend();
        budget.spend();
        assert!(budget.exhausted());

        let mut unlimited = ReconnectBudget::new(None);
        for _ in 0..100 {
            unlimited.spend();
        }
        assert!(!unlimited.exhausted());
    }
}
