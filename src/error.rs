//! Error types for the MJPEG client
//!
//! Every per-connection failure (framing, truncation, oversize, transport,
//! stall) is caught by the client's supervision loop and turned into a
//! reconnect. Clean end-of-stream is not an error at all; see
//! [`FrameRead::EndOfStream`](crate::protocol::FrameRead::EndOfStream).

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for all client operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed multipart framing
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The stream ended in the middle of a frame body
    #[error("stream truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    /// Frame does not fit the destination buffer and oversize-skip is off
    #[error("frame too large: {length} bytes exceeds buffer capacity {capacity}")]
    Oversize { length: usize, capacity: usize },

    /// The stream closed before a complete frame head was read
    #[error("connection closed")]
    ConnectionClosed,

    /// HTTP client failure (connect, TLS, redirect, protocol)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection could not be established or the server rejected it
    #[error("connection error: {0}")]
    Connection(String),

    /// No data arrived within the configured window
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// `open()` called on a client that is already running
    #[error("client already open")]
    AlreadyOpen,

    /// Stream URL could not be parsed
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The background worker panicked and took the connector with it
    #[error("background worker lost")]
    WorkerLost,
}

/// Errors in the per-frame delimiter/header block
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("boundary {expected:?} expected, found {found:?}")]
    MissingBoundary { expected: String, found: String },

    #[error("invalid header line: {0:?}")]
    InvalidHeaderLine(String),

    #[error("invalid or missing Content-Length: {0:?}")]
    InvalidContentLength(Option<String>),

    #[error("missing Content-Type header")]
    MissingContentType,

    #[error("wrong Content-Type: {0}")]
    WrongContentType(String),

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Content-Type does not provide a boundary parameter")]
    MissingBoundaryParameter,
}

impl Error {
    /// Normalize read stalls into [`Error::Timeout`].
    ///
    /// Sockets report a stall as `WouldBlock` or `TimedOut` depending on the
    /// platform; a blocking `reqwest` body wraps its own timeout error in an
    /// `io::Error`.
    pub fn with_read_timeout(self, timeout: Duration) -> Self {
        match self {
            Error::Io(ref e) if is_timeout(e) => Error::Timeout(timeout),
            Error::Http(ref e) if e.is_timeout() => Error::Timeout(timeout),
            other => other,
        }
    }
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    ) || error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
        .is_some_and(reqwest::Error::is_timeout)
}

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
