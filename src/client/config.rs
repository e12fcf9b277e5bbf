//! Client configuration

use std::time::Duration;

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stream URL (`http://host[:port]/path`)
    pub url: String,

    /// Length of the frame rate window
    pub log_interval: Duration,

    /// Delay before reconnecting after the stream ends or fails
    pub reconnect_interval: Duration,

    /// Maximum reconnect attempts per `open()` (None = retry forever)
    pub reconnect_limit: Option<u32>,

    /// Longest time a single frame read may wait for data
    pub read_timeout: Duration,

    /// Connection establishment timeout
    pub connect_timeout: Duration,

    /// Size of the buffered reader wrapping the socket
    pub read_buffer_size: usize,

    /// `User-Agent` sent by the HTTP connectors
    pub user_agent: String,
}

impl ClientConfig {
    /// Create a config for `url` with default settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            log_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
            reconnect_limit: None,
            read_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: 64 * 1024, // 64KB
            user_agent: format!("mjpeg-rs/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the frame rate window
    pub fn log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    /// Set the reconnect delay
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Give up after `limit` reconnect attempts
    pub fn reconnect_limit(mut self, limit: u32) -> Self {
        self.reconnect_limit = Some(limit);
        self
    }

    /// Set the per-read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the `User-Agent` header value
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }
}
