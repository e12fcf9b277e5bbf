//! MJPEG stream client
//!
//! Two interchangeable execution models over one state machine:
//! - [`MjpegClient`] runs the stream loop on a dedicated OS thread
//! - [`AsyncMjpegClient`] runs it as a tokio task
//!
//! Both exchange frames with the application through a [`BufferPool`]:
//! the application lends empty buffers, the client hands them back filled,
//! in arrival order.
//!
//! [`BufferPool`]: crate::buffer::BufferPool

pub mod config;
pub mod connector;
pub mod state;
pub mod task;
pub mod threaded;

pub use config::ClientConfig;
pub use connector::{
    parse_stream_url, AsyncConnector, AsyncHttpConnector, BodyStream, Connector, HttpConnector,
    Response,
};
pub use state::{ClientState, LastError};
pub use task::AsyncMjpegClient;
pub use threaded::MjpegClient;
