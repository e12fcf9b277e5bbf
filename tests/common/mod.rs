//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mjpeg_rs::protocol::HeaderSet;
use mjpeg_rs::{AsyncConnector, Connector, Error, Response, Result};

pub const BOUNDARY: &str = "frame";

/// One multipart frame carrying `body`
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    part.extend_from_slice(body);
    part.extend_from_slice(b"\r\n");
    part
}

/// Frame body of `len` bytes, tagged so frames can be told apart
pub fn jpeg(tag: u8, len: usize) -> Vec<u8> {
    let mut body = vec![tag; len];
    if len >= 2 {
        body[0] = 0xFF;
        body[1] = 0xD8;
    }
    body
}

/// The zero-length frame that ends a stream
pub fn end_of_stream() -> Vec<u8> {
    format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: 0\r\n\r\n").into_bytes()
}

/// Stream body made of `parts` concatenated
pub fn stream(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

pub fn multipart_headers() -> HeaderSet {
    let mut headers = HeaderSet::new();
    headers.insert(
        "Content-Type",
        format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
    );
    headers
}

/// A 200 response whose body is `body`
pub fn ok_response(body: Vec<u8>) -> Result<Response<Cursor<Vec<u8>>>> {
    Ok(Response {
        status: 200,
        headers: multipart_headers(),
        body: Cursor::new(body),
    })
}

pub fn refused() -> Result<Response<Cursor<Vec<u8>>>> {
    Err(Error::Connection("connection refused".into()))
}

/// Connector replaying a fixed list of connection outcomes.
///
/// Once the script runs out every attempt is refused.
pub struct ScriptedConnector {
    script: VecDeque<Result<Response<Cursor<Vec<u8>>>>>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Result<Response<Cursor<Vec<u8>>>>>) -> Self {
        Self {
            script: script.into(),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of `connect` calls, readable after the connector moved into a client
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }

    fn next(&mut self) -> Result<Response<Cursor<Vec<u8>>>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.script.pop_front().unwrap_or_else(refused)
    }
}

impl Connector for ScriptedConnector {
    type Stream = Cursor<Vec<u8>>;

    fn connect(&mut self) -> Result<Response<Self::Stream>> {
        self.next()
    }
}

impl AsyncConnector for ScriptedConnector {
    type Stream = Cursor<Vec<u8>>;

    async fn connect(&mut self) -> Result<Response<Self::Stream>> {
        self.next()
    }
}
