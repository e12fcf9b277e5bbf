//! Buffer pool
//!
//! Two collections guarded by one mutex:
//!
//! ```text
//!   application                client loop                 application
//!  release(buf) ──► free (LIFO) ──► acquire_free() ──► fill ──► publish(buf)
//!                                                                   │
//!               consume() ◄── ready (FIFO) ◄────────────────────────┘
//! ```
//!
//! Buffers move by value between the collections, so a buffer is never
//! reachable from two owners at once. The ready queue cannot grow beyond the
//! number of buffers the application created, which bounds memory without a
//! separate capacity limit.
//!
//! Blocking consumers wait on a `Condvar`, async consumers on a
//! `tokio::sync::Notify`; both are signalled on every publish.
//!
//! Once the close sentinel is queued the pool stays closed until the next
//! run reopens it, and `publish` hands buffers back instead of queueing them
//! behind the sentinel.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use super::frame::FrameBuffer;

/// Item taken off the ready queue
#[derive(Debug)]
pub enum Delivery {
    /// A filled frame, in capture order
    Frame(FrameBuffer),
    /// The stream was closed; delivered once per stop
    Closed,
}

impl Delivery {
    /// The frame, or `None` for the close sentinel
    pub fn into_frame(self) -> Option<FrameBuffer> {
        match self {
            Delivery::Frame(buf) => Some(buf),
            Delivery::Closed => None,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<FrameBuffer>,
    ready: VecDeque<Delivery>,
    closed: bool,
}

/// Free buffers plus the FIFO of filled ones
#[derive(Debug, Default)]
pub struct BufferPool {
    state: Mutex<PoolState>,
    ready_cond: Condvar,
    ready_notify: Notify,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Pool state is two plain collections; a panic elsewhere cannot leave them torn
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a free buffer, or `None` if the application has not returned any
    pub fn acquire_free(&self) -> Option<FrameBuffer> {
        self.lock().free.pop()
    }

    /// Return a buffer for writing
    pub fn release(&self, buffer: FrameBuffer) {
        self.lock().free.push(buffer);
    }

    /// Queue a filled buffer for the consumer.
    ///
    /// Fails with the buffer once the pool is closed.
    pub fn publish(&self, buffer: FrameBuffer) -> Result<(), FrameBuffer> {
        let mut state = self.lock();
        if state.closed {
            return Err(buffer);
        }
        state.ready.push_back(Delivery::Frame(buffer));
        drop(state);

        self.notify_ready();
        Ok(())
    }

    /// Queue the close sentinel behind any frames already published.
    ///
    /// Only the first call after [`reopen`](Self::reopen) queues one; returns
    /// whether this call did.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.ready.push_back(Delivery::Closed);
        drop(state);

        self.notify_ready();
        true
    }

    /// Accept frames again for a new run
    pub(crate) fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Refuse frames without queueing a sentinel
    pub(crate) fn seal(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn notify_ready(&self) {
        self.ready_cond.notify_one();
        self.ready_notify.notify_one();
    }

    /// Block until a frame is ready. Returns `None` for the close sentinel.
    pub fn consume(&self) -> Option<FrameBuffer> {
        let mut state = self.lock();
        loop {
            if let Some(delivery) = state.ready.pop_front() {
                return delivery.into_frame();
            }
            state = self
                .ready_cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`consume`](Self::consume) but gives up after `timeout`.
    ///
    /// Returns `None` on timeout, `Some(Delivery::Closed)` for the sentinel.
    pub fn consume_timeout(&self, timeout: Duration) -> Option<Delivery> {
        let (mut state, _) = self
            .ready_cond
            .wait_timeout_while(self.lock(), timeout, |state| state.ready.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.ready.pop_front()
    }

    /// Wait asynchronously until a frame is ready. Returns `None` for the close sentinel.
    pub async fn consume_async(&self) -> Option<FrameBuffer> {
        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = self.ready_notify.notified();
            let delivery = self.lock().ready.pop_front();
            if let Some(delivery) = delivery {
                return delivery.into_frame();
            }
            notified.await;
        }
    }

    /// Number of buffers available for writing
    pub fn free_len(&self) -> usize {
        self.lock().free.len()
    }

    /// Number of deliveries waiting for the consumer
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }
}
