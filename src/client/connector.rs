//! Stream connectors
//!
//! The client loop only needs a response status, the response headers and a
//! buffered body reader. Connectors supply those; [`HttpConnector`] and
//! [`AsyncHttpConnector`] do it with `reqwest` (redirects, https and chunked
//! bodies included), tests and applications can plug in their own transport.

use std::future::Future;
use std::io::{self, BufRead, BufReader};
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Url;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::protocol::headers::HeaderSet;
use crate::protocol::MULTIPART_CONTENT_TYPE;

use super::config::ClientConfig;

/// An opened stream: response metadata plus the body reader
#[derive(Debug)]
pub struct Response<S> {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderSet,
    /// Body positioned at its first byte
    pub body: S,
}

/// Opens a stream with blocking I/O
pub trait Connector: Send + 'static {
    type Stream: BufRead + Send;

    /// Open a new connection. Called once per connection attempt.
    fn connect(&mut self) -> Result<Response<Self::Stream>>;
}

/// Opens a stream with async I/O
pub trait AsyncConnector: Send + 'static {
    type Stream: AsyncBufRead + Unpin + Send;

    /// Open a new connection. Called once per connection attempt.
    fn connect(&mut self) -> impl Future<Output = Result<Response<Self::Stream>>> + Send;
}

/// Body of an async HTTP response as a stream of chunks
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Parse a stream URL, accepting `http` and `https` only
pub fn parse_stream_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme {scheme:?}: {url}"
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidUrl(format!("missing host: {url}")));
    }

    Ok(parsed)
}

impl From<&HeaderMap> for HeaderSet {
    fn from(map: &HeaderMap) -> Self {
        let mut headers = HeaderSet::new();
        for (name, value) in map {
            headers.insert(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        headers
    }
}

/// Classify a failed request: connect failures, stalls before the response
/// head, everything else
fn send_error(url: &Url, error: reqwest::Error, read_timeout: Duration) -> Error {
    if error.is_connect() {
        Error::Connection(format!("cannot connect to {url}: {error}"))
    } else if error.is_timeout() {
        Error::Timeout(read_timeout)
    } else {
        Error::Http(error)
    }
}

/// HTTP connector on `reqwest::blocking`
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::blocking::Client,
    url: Url,
    read_timeout: Duration,
    read_buffer_size: usize,
}

impl HttpConnector {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let url = parse_stream_url(&config.url)?;
        // The blocking client applies `timeout` to every read of the body
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()?;

        Ok(Self {
            client,
            url,
            read_timeout: config.read_timeout,
            read_buffer_size: config.read_buffer_size.max(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for HttpConnector {
    type Stream = BufReader<reqwest::blocking::Response>;

    fn connect(&mut self) -> Result<Response<Self::Stream>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, MULTIPART_CONTENT_TYPE)
            .send()
            .map_err(|e| send_error(&self.url, e, self.read_timeout))?;

        let status = response.status().as_u16();
        let headers = HeaderSet::from(response.headers());
        tracing::debug!(url = %response.url(), status = status, "HTTP response received");

        Ok(Response {
            status,
            headers,
            body: BufReader::with_capacity(self.read_buffer_size, response),
        })
    }
}

/// HTTP connector on async `reqwest`
#[derive(Debug, Clone)]
pub struct AsyncHttpConnector {
    client: reqwest::Client,
    url: Url,
    read_timeout: Duration,
}

impl AsyncHttpConnector {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let url = parse_stream_url(&config.url)?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            url,
            read_timeout: config.read_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl AsyncConnector for AsyncHttpConnector {
    type Stream = StreamReader<BodyStream, Bytes>;

    async fn connect(&mut self) -> Result<Response<Self::Stream>> {
        let request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, MULTIPART_CONTENT_TYPE)
            .send();

        // Body reads are bounded by the client loop; this covers the response head
        let response = tokio::time::timeout(self.read_timeout, request)
            .await
            .map_err(|_| Error::Timeout(self.read_timeout))?
            .map_err(|e| send_error(&self.url, e, self.read_timeout))?;

        let status = response.status().as_u16();
        let headers = HeaderSet::from(response.headers());
        tracing::debug!(url = %response.url(), status = status, "HTTP response received");

        let body: BodyStream = Box::pin(response.bytes_stream().map_err(io::Error::other));

        Ok(Response {
            status,
            headers,
            body: StreamReader::new(body),
        })
    }
}
