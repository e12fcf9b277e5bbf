//! Async MJPEG client
//!
//! Same loop as [`super::threaded`], driven as a tokio task. Every await
//! point races against the stop signal, so `close()` returns promptly even
//! while a read is pending.
//!
//! # Example
//!
//! ```no_run
//! use mjpeg_rs::client::{AsyncMjpegClient, ClientConfig};
//!
//! # async fn example() -> mjpeg_rs::error::Result<()> {
//! let mut client = AsyncMjpegClient::new(ClientConfig::new("http://camera.local/stream"))?;
//! for buffer in client.request_buffers(512 * 1024, 4) {
//!     client.enqueue_free(buffer);
//! }
//! client.open()?;
//!
//! while let Some(frame) = client.dequeue_ready().await {
//!     println!("frame {} ({} bytes)", frame.sequence(), frame.used());
//!     client.enqueue_free(frame);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Frames are also available as a [`Stream`] through
//! [`AsyncMjpegClient::frames`].

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::{BufferPool, Delivery, FrameBuffer};
use crate::error::{Error, Result};
use crate::protocol::{negotiate_boundary, read_frame_async, FrameRead};
use crate::stats::StreamStats;

use super::config::ClientConfig;
use super::connector::{AsyncConnector, AsyncHttpConnector};
use super::state::{ClientState, LastError, ReconnectBudget, Session, Shared};

/// MJPEG client running its stream loop as a tokio task
pub struct AsyncMjpegClient<C: AsyncConnector = AsyncHttpConnector> {
    config: ClientConfig,
    shared: Arc<Shared>,
    stop: watch::Sender<bool>,
    /// Idle connector; the task takes it while running and puts it back on exit
    connector: Arc<Mutex<Option<C>>>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncMjpegClient<AsyncHttpConnector> {
    /// Create a client that fetches `config.url` over HTTP or HTTPS
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = AsyncHttpConnector::new(&config)?;
        Ok(Self::with_connector(config, connector))
    }
}

impl<C: AsyncConnector> AsyncMjpegClient<C> {
    /// Create a client using a custom connector
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared::new(&config)),
            config,
            stop,
            connector: Arc::new(Mutex::new(Some(connector))),
            worker: None,
        }
    }

    /// Spawn the stream task on the current tokio runtime.
    ///
    /// Fails with [`Error::AlreadyOpen`] only while a run is active; a task
    /// that stopped on its own (reconnect limit reached) is replaced.
    pub fn open(&mut self) -> Result<()> {
        if self.worker.is_some() && !self.shared.pool.is_closed() {
            return Err(Error::AlreadyOpen);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        let connector = match self.take_connector() {
            Some(connector) => connector,
            // Stop was requested but the task has not wound down yet
            None if self.is_open() => return Err(Error::AlreadyOpen),
            None => return Err(Error::WorkerLost),
        };
        self.worker = None;

        self.stop.send_replace(false);
        self.shared.begin_run();
        let worker = Worker {
            connector,
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            slot: Arc::clone(&self.connector),
        };

        self.worker = Some(runtime.spawn(worker.run(self.stop.subscribe())));
        Ok(())
    }

    /// Stop streaming and wait for the task to exit. The client can be opened again.
    pub async fn close(&mut self) {
        self.stop.send_replace(true);
        self.shared.deliver_close();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::error!(url = %self.config.url, error = %e, "MJPEG client task failed");
                self.shared.set_state(ClientState::Closed);
            }
        }
    }

    fn take_connector(&self) -> Option<C> {
        self.connector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether the stream task is running
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

    /// Wait for the next frame; `None` once the client is closed
    pub async fn dequeue_ready(&self) -> Option<FrameBuffer> {
        self.shared.pool.consume_async().await
    }

    /// Wait at most `timeout` for a frame or the close sentinel
    pub async fn dequeue_ready_timeout(&self, timeout: Duration) -> Option<Delivery> {
        match tokio::time::timeout(timeout, self.shared.pool.consume_async()).await {
            Ok(Some(frame)) => Some(Delivery::Frame(frame)),
            Ok(None) => Some(Delivery::Closed),
            Err(_) => None,
        }
    }

    /// Frames as an async stream, ending at the close sentinel.
    ///
    /// Buffers are not recycled by the stream; hand them back with
    /// [`enqueue_free`](Self::enqueue_free) or [`BufferPool::release`].
    pub fn frames(&self) -> impl Stream<Item = FrameBuffer> + Send + 'static {
        futures::stream::unfold(self.pool(), |pool| async move {
            let frame = pool.consume_async().await?;
            Some((frame, pool))
        })
    }

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

    /// Last error of the stream task, cleared on each new connection attempt
    pub fn last_error(&self) -> LastError {
        self.shared.last_error()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<LastError> {
        self.shared.subscribe_errors()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl<C: AsyncConnector> Drop for AsyncMjpegClient<C> {
    fn drop(&mut self) {
        self.stop.send_replace(true);
        self.shared.deliver_close();
    }
}

/// Resolves once stop is requested or the client handle is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

struct Worker<C> {
    connector: C,
    config: ClientConfig,
    shared: Arc<Shared>,
    slot: Arc<Mutex<Option<C>>>,
}

impl<C: AsyncConnector> Worker<C> {
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut budget = ReconnectBudget::new(self.config.reconnect_limit);
        tracing::info!(url = %self.config.url, "MJPEG client started");

        while !*stop.borrow() {
            let mut session = self.shared.begin_connection();

            match self.stream(&mut session, &mut stop).await {
                Ok(()) => tracing::debug!(url = %self.config.url, "Stream ended"),
                Err(e) => {
                    tracing::warn!(url = %self.config.url, error = %e, "Stream failed");
                    self.shared.record_error(e);
                }
            }

            if *stop.borrow() {
                break;
            }
            if budget.exhausted() {
                tracing::info!(url = %self.config.url, "Reconnect limit reached, closing");
                break;
            }

            self.shared.set_state(ClientState::Reconnecting);
            tracing::debug!(delay = ?self.config.reconnect_interval, "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = stop_requested(&mut stop) => break,
            }
            budget.spend();
            self.shared.note_reconnect();
        }

        // The slot stays locked until the connector is parked, so whoever sees
        // the close sentinel can take it right away
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.finish_run();
        *slot = Some(self.connector);
        drop(slot);
        tracing::info!(url = %self.config.url, "MJPEG client stopped");
    }

    /// One connection: connect, negotiate, read frames until it ends
    async fn stream(
        &mut self,
        session: &mut Session,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let read_timeout = self.config.read_timeout;

        let response = tokio::select! {
            response = self.connector.connect() => response?,
            _ = stop_requested(stop) => return Ok(()),
        };
        let boundary = negotiate_boundary(response.status, &response.headers)?;
        let mut body = response.body;

        self.shared.set_state(ClientState::Streaming);
        tracing::info!(url = %self.config.url, boundary = %boundary, "Stream opened");

        loop {
            if *stop.borrow() {
                return Ok(());
            }

            let mut buffer = self.shared.acquire();

            let read = tokio::select! {
                biased;
                _ = stop_requested(stop) => None,
                read = tokio::time::timeout(
                    read_timeout,
                    read_frame_async(
                        &mut body,
                        &boundary,
                        buffer.as_mut().map(FrameBuffer::storage_mut),
                        true,
                    ),
                ) => Some(read),
            };

            match read {
                Some(Ok(Ok(FrameRead::Frame(info)))) if !*stop.borrow() => {
                    self.shared.complete(session, buffer, info);
                }
                Some(Ok(Ok(FrameRead::Frame(_)))) => {
                    self.shared.abandon(buffer);
                    return Ok(());
                }
                Some(Ok(Ok(FrameRead::EndOfStream))) => {
                    self.shared.abandon(buffer);
                    tracing::debug!(url = %self.config.url, "End of stream marker received");
                    return Ok(());
                }
                Some(Ok(Err(e))) => {
                    self.shared.abandon(buffer);
                    return Err(e);
                }
                Some(Err(_elapsed)) => {
                    self.shared.abandon(buffer);
                    return Err(Error::Timeout(read_timeout));
                }
                None => {
                    self.shared.abandon(buffer);
                    return Ok(());
                }
            }
        }
    }
}
