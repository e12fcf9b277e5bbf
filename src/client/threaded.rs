//! Thread-per-client MJPEG client
//!
//! The connect/read/reconnect loop runs on a dedicated worker thread with
//! blocking I/O. The application talks to it only through the buffer pool:
//!
//! ```no_run
//! use mjpeg_rs::client::{ClientConfig, MjpegClient};
//!
//! # fn example() -> mjpeg_rs::error::Result<()> {
//! let mut client = MjpegClient::new(ClientConfig::new("http://camera.local/stream"))?;
//! for buffer in client.request_buffers(512 * 1024, 4) {
//!     client.enqueue_free(buffer);
//! }
//! client.open()?;
//!
//! while let Some(frame) = client.dequeue_ready() {
//!     println!("frame {} ({} bytes)", frame.sequence(), frame.used());
//!     client.enqueue_free(frame);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Stalls are bounded by the connector: [`HttpConnector`] applies
//! `read_timeout` to every body read, custom connectors should do the same.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;

use crate::buffer::{BufferPool, Delivery, FrameBuffer};
use crate::error::{Error, Result};
use crate::protocol::{negotiate_boundary, read_frame, FrameRead};
use crate::stats::StreamStats;

use super::config::ClientConfig;
use super::connector::{Connector, HttpConnector};
use super::state::{ClientState, LastError, ReconnectBudget, Session, Shared};

/// Stop flag the worker can sleep on
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn set(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    fn reset(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    fn is_set(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` unless stopped first. Returns whether stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

/// MJPEG client running its stream loop on a worker thread
pub struct MjpegClient<C: Connector = HttpConnector> {
    config: ClientConfig,
    shared: Arc<Shared>,
    stop: Arc<StopSignal>,
    connector: Option<C>,
    worker: Option<JoinHandle<C>>,
}

impl MjpegClient<HttpConnector> {
    /// Create a client that fetches `config.url` over HTTP or HTTPS
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = HttpConnector::new(&config)?;
        Ok(Self::with_connector(config, connector))
    }
}

impl<C: Connector> MjpegClient<C> {
    /// Create a client using a custom connector
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        Self {
            shared: Arc::new(Shared::new(&config)),
            config,
            stop: Arc::new(StopSignal::default()),
            connector: Some(connector),
            worker: None,
        }
    }

    /// Start streaming on a background thread.
    ///
    /// Fails with [`Error::AlreadyOpen`] only while a run is active; a worker
    /// that stopped on its own (reconnect limit reached) is joined first.
    pub fn open(&mut self) -> Result<()> {
        if self.worker.is_some() && !self.shared.pool.is_closed() {
            return Err(Error::AlreadyOpen);
        }
        self.join_worker();
        let connector = self.connector.take().ok_or(Error::WorkerLost)?;

        self.stop.reset();
        self.shared.begin_run();
        let worker = Worker {
            connector,
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&self.stop),
        };

        let handle = thread::Builder::new()
            .name("mjpeg-client".into())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.shared.cancel_run();
                e
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop streaming and wait for the worker to exit.
    ///
    /// A consumer blocked in [`dequeue_ready`](Self::dequeue_ready) is
    /// released immediately; the worker itself exits once its current read
    /// returns (at most the read timeout). The client can be opened again.
    pub fn close(&mut self) {
        self.stop.set();
        self.shared.deliver_close();
        self.join_worker();
    }

    /// Wait for the worker and take the connector back
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(connector) => self.connector = Some(connector),
                Err(_) => {
                    tracing::error!(url = %self.config.url, "MJPEG client worker panicked");
                    self.shared.set_state(ClientState::Closed);
                }
            }
        }
    }

    /// Whether the background worker is running
    pub fn is_open(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Allocate `count` buffers of `length` bytes
    pub fn request_buffers(&self, length: usize, count: usize) -> Vec<FrameBuffer> {
        FrameBuffer::allocate(length, count)
    }

    /// Hand a buffer to the client for writing
    pub fn enqueue_free(&self, buffer: FrameBuffer) {
        self.shared.pool.release(buffer);
    }

    /// Block until a frame is ready; `None` once the client is closed
    pub fn dequeue_ready(&self) -> Option<FrameBuffer> {
        self.shared.pool.consume()
    }

    /// Wait at most `timeout` for a frame or the close sentinel
    pub fn dequeue_ready_timeout(&self, timeout: Duration) -> Option<Delivery> {
        self.shared.pool.consume_timeout(timeout)
    }

    /// Pool handle for consumer threads
    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.shared.pool)
    }

    /// Snapshot of the stream counters
    pub fn stats(&self) -> StreamStats {
        self.shared.snapshot()
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    /// Last error of the background loop, cleared on each new connection attempt
    pub fn last_error(&self) -> LastError {
        self.shared.last_error()
    }

    /// Watch the last-error slot for changes
    pub fn subscribe_errors(&self) -> watch::Receiver<LastError> {
        self.shared.subscribe_errors()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl<C: Connector> Drop for MjpegClient<C> {
    fn drop(&mut self) {
        // The worker is detached and exits at its next stop check
        self.stop.set();
        self.shared.deliver_close();
    }
}

struct Worker<C> {
    connector: C,
    config: ClientConfig,
    shared: Arc<Shared>,
    stop: Arc<StopSignal>,
}

impl<C: Connector> Worker<C> {
    fn run(mut self) -> C {
        let mut budget = ReconnectBudget::new(self.config.reconnect_limit);
        tracing::info!(url = %self.config.url, "MJPEG client started");

        while !self.stop.is_set() {
            let mut session = self.shared.begin_connection();

            match self.stream(&mut session) {
                Ok(()) => tracing::debug!(url = %self.config.url, "Stream ended"),
                Err(e) => {
                    tracing::warn!(url = %self.config.url, error = %e, "Stream failed");
                    self.shared.record_error(e);
                }
            }

            if self.stop.is_set() {
                break;
            }
            if budget.exhausted() {
                tracing::info!(url = %self.config.url, "Reconnect limit reached, closing");
                break;
            }

            self.shared.set_state(ClientState::Reconnecting);
            tracing::debug!(delay = ?self.config.reconnect_interval, "Reconnecting");
            if self.stop.wait(self.config.reconnect_interval) {
                break;
            }
            budget.spend();
            self.shared.note_reconnect();
        }

        self.shared.finish_run();
        tracing::info!(url = %self.config.url, "MJPEG client stopped");
        self.connector
    }

    /// One connection: connect, negotiate, read frames until it ends
    fn stream(&mut self, session: &mut Session) -> Result<()> {
        let read_timeout = self.config.read_timeout;
        let response = self.connector.connect()?;
        let boundary = negotiate_boundary(response.status, &response.headers)?;
        let mut body = response.body;

        self.shared.set_state(ClientState::Streaming);
        tracing::info!(url = %self.config.url, boundary = %boundary, "Stream opened");

        loop {
            if self.stop.is_set() {
                return Ok(());
            }

            let mut buffer = self.shared.acquire();
            let read = read_frame(
                &mut body,
                &boundary,
                buffer.as_mut().map(FrameBuffer::storage_mut),
                true,
            );

            match read {
                Ok(FrameRead::Frame(info)) if !self.stop.is_set() => {
                    self.shared.complete(session, buffer, info);
                }
                Ok(FrameRead::Frame(_)) => {
                    self.shared.abandon(buffer);
                    return Ok(());
                }
                Ok(FrameRead::EndOfStream) => {
                    self.shared.abandon(buffer);
                    tracing::debug!(url = %self.config.url, "End of stream marker received");
                    return Ok(());
                }
                Err(e) => {
                    self.shared.abandon(buffer);
                    return Err(e.with_read_timeout(read_timeout));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal() {
        let stop = StopSignal::default();
        assert!(!stop.is_set());
        assert!(!stop.wait(Duration::from_millis(5)));

        stop.set();
        assert!(stop.is_set());
        assert!(stop.wait(Duration::from_secs(60)));

        stop.reset();
        assert!(!stop.is_set());
    }

    #[test]
    fn test_new_rejects_unsupported_url() {
        let result = MjpegClient::new(ClientConfig::new("ftp://cam/stream"));
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_new_client_is_closed() {
        let client = MjpegClient::new(ClientConfig::new("http://127.0.0.1:9/stream")).unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        assert!(!client.is_open());
        assert_eq!(client.stats().frames, 0);
        assert_eq!(client.stats().url, "http://127.0.0.1:9/stream");
    }
}
