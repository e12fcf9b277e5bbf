//! MJPEG-over-HTTP streaming client
//!
//! Connects to an HTTP endpoint serving `multipart/x-mixed-replace` JPEG
//! frames, parses the stream into discrete frames and hands them to the
//! application through a pool of reusable buffers. Dropped connections,
//! malformed frames and stalls trigger an automatic reconnect.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mjpeg_rs::{ClientConfig, MjpegClient};
//!
//! # fn main() -> mjpeg_rs::Result<()> {
//! let config = ClientConfig::new("http://192.168.1.10:8080/video")
//!     .reconnect_interval(Duration::from_secs(2));
//! let mut client = MjpegClient::new(config)?;
//!
//! for buffer in client.request_buffers(1024 * 1024, 8) {
//!     client.enqueue_free(buffer);
//! }
//! client.open()?;
//!
//! while let Some(frame) = client.dequeue_ready() {
//!     // frame.data() holds one complete JPEG image
//!     client.enqueue_free(frame);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`protocol`]: boundary negotiation and the multipart frame reader
//! - [`buffer`]: frame buffers and the free/ready pool
//! - [`client`]: threaded and async clients, connectors, configuration
//! - [`stats`]: stream counters and the frame rate meter

pub mod buffer;
pub mod client;
pub mod error;
pub mod protocol;
pub mod stats;

pub use buffer::{BufferPool, Delivery, FrameBuffer};
pub use client::{
    AsyncConnector, AsyncHttpConnector, AsyncMjpegClient, ClientConfig, ClientState, Connector,
    HttpConnector, MjpegClient, Response,
};
pub use error::{Error, FramingError, Result};
pub use protocol::{FrameInfo, FrameRead};
pub use stats::StreamStats;
