//! Frame reader
//!
//! Extracts exactly one frame per call. Parsing of the delimiter and header
//! block is a small line-driven state machine ([`HeadParser`]) so that the
//! blocking reader ([`read_frame`]) and the async reader
//! ([`read_frame_async`]) differ only in how they pull bytes.
//!
//! Framing relies on the mandatory `Content-Length` rather than scanning for
//! the next boundary, so JPEG payloads that happen to contain the boundary
//! string cannot confuse the parser.

use std::io::{self, BufRead, Read};
use std::time::SystemTime;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Error, FramingError, Result};

use super::headers::HeaderSet;
use super::{JPEG_CONTENT_TYPE, MAX_LINE_LENGTH};

/// Metadata of one frame taken off the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Time at which the first body byte was about to be read
    pub timestamp: SystemTime,
    /// Value of the frame's `Content-Length`
    pub length: usize,
}

/// Outcome of reading one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// A frame was consumed. Its body was stored only if the destination was
    /// large enough (`capacity >= length`), otherwise it was skipped.
    Frame(FrameInfo),
    /// `Content-Length: 0` marker; the server finished the stream cleanly
    EndOfStream,
}

/// Validated frame head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Head {
    EndOfStream,
    Frame { length: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadState {
    /// Expecting the delimiter line; one leading blank line is tolerated
    Boundary { blank_seen: bool },
    Headers,
}

/// Line-driven parser for the delimiter + header block of one frame
#[derive(Debug)]
pub(crate) struct HeadParser<'a> {
    boundary: &'a str,
    state: HeadState,
    headers: HeaderSet,
}

impl<'a> HeadParser<'a> {
    pub(crate) fn new(boundary: &'a str) -> Self {
        Self {
            boundary,
            state: HeadState::Boundary { blank_seen: false },
            headers: HeaderSet::new(),
        }
    }

    /// Feed one decoded, trimmed line. Returns the head once the block is complete.
    pub(crate) fn feed(&mut self, line: &str) -> std::result::Result<Option<Head>, FramingError> {
        match self.state {
            HeadState::Boundary { blank_seen } => {
                if line.is_empty() && !blank_seen {
                    self.state = HeadState::Boundary { blank_seen: true };
                    return Ok(None);
                }
                if line != self.boundary {
                    return Err(FramingError::MissingBoundary {
                        expected: self.boundary.to_owned(),
                        found: line.to_owned(),
                    });
                }
                self.state = HeadState::Headers;
                Ok(None)
            }
            HeadState::Headers => {
                if line.is_empty() {
                    return self.finish().map(Some);
                }
                self.headers.insert_line(line)?;
                Ok(None)
            }
        }
    }

    fn finish(&self) -> std::result::Result<Head, FramingError> {
        let length = self.headers.content_length()?;
        if length == 0 {
            return Ok(Head::EndOfStream);
        }
        self.headers.expect_content_type(JPEG_CONTENT_TYPE)?;
        Ok(Head::Frame { length })
    }
}

/// Whether a body goes into the destination or is read and dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyPlan {
    Store,
    Skip,
}

fn plan_body(length: usize, capacity: usize, skip_oversize: bool) -> Result<BodyPlan> {
    if capacity >= length {
        Ok(BodyPlan::Store)
    } else if skip_oversize {
        Ok(BodyPlan::Skip)
    } else {
        Err(Error::Oversize { length, capacity })
    }
}

/// Decode a raw line, dropping the terminator and surrounding whitespace
fn decode_line(raw: &[u8]) -> std::result::Result<&str, FramingError> {
    std::str::from_utf8(raw)
        .map(str::trim)
        .map_err(|_| FramingError::InvalidUtf8)
}

/// Check the result of a bounded `read_until`
fn check_line(raw: &[u8], read: usize) -> Result<()> {
    if read == 0 {
        return Err(Error::ConnectionClosed);
    }
    if read >= MAX_LINE_LENGTH && !raw.ends_with(b"\n") {
        return Err(FramingError::LineTooLong(MAX_LINE_LENGTH).into());
    }
    Ok(())
}

/// Read one text line of at most [`MAX_LINE_LENGTH`] bytes, trimmed.
///
/// End of stream before any byte is [`Error::ConnectionClosed`].
pub(crate) fn read_line<'b, R: BufRead>(reader: &mut R, raw: &'b mut Vec<u8>) -> Result<&'b str> {
    raw.clear();
    let read = reader
        .by_ref()
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', raw)?;
    check_line(raw, read)?;
    Ok(decode_line(raw)?)
}

/// Async counterpart of [`read_line`]
pub(crate) async fn read_line_async<'b, R: AsyncBufRead + Unpin>(
    reader: &mut R,
    raw: &'b mut Vec<u8>,
) -> Result<&'b str> {
    raw.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', raw)
        .await?;
    check_line(raw, read)?;
    Ok(decode_line(raw)?)
}

/// Read one frame from a blocking stream.
///
/// `dest` receives the body when its length (the buffer capacity) is at least
/// the frame's `Content-Length`. Otherwise the body is read and discarded if
/// `skip_oversize` is set, or [`Error::Oversize`] is returned without
/// consuming it. Passing `None` with `skip_oversize = true` discards the
/// next frame entirely.
pub fn read_frame<R: BufRead>(
    reader: &mut R,
    boundary: &str,
    dest: Option<&mut [u8]>,
    skip_oversize: bool,
) -> Result<FrameRead> {
    let mut parser = HeadParser::new(boundary);
    let mut raw = Vec::with_capacity(128);

    let head = loop {
        if let Some(head) = parser.feed(read_line(reader, &mut raw)?)? {
            break head;
        }
    };

    let length = match head {
        Head::EndOfStream => return Ok(FrameRead::EndOfStream),
        Head::Frame { length } => length,
    };

    let capacity = dest.as_ref().map_or(0, |d| d.len());
    let plan = plan_body(length, capacity, skip_oversize)?;
    let timestamp = SystemTime::now();

    match (plan, dest) {
        (BodyPlan::Store, Some(dest)) => read_body(reader, &mut dest[..length])?,
        _ => skip_body(reader, length)?,
    }

    Ok(FrameRead::Frame(FrameInfo { timestamp, length }))
}

fn read_body<R: Read>(reader: &mut R, dest: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < dest.len() {
        let n = match reader.read(&mut dest[filled..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(Error::Truncated {
                expected: dest.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

fn skip_body<R: BufRead>(reader: &mut R, length: usize) -> Result<()> {
    let mut left = length;
    while left > 0 {
        let available = match reader.fill_buf() {
            Ok(buf) => buf.len(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if available == 0 {
            return Err(Error::Truncated {
                expected: length,
                received: length - left,
            });
        }
        let n = available.min(left);
        reader.consume(n);
        left -= n;
    }
    Ok(())
}

/// Read one frame from an async stream.
///
/// Same contract as [`read_frame`]. The future may be dropped at any await
/// point (timeout, stop request); the partially read frame is then abandoned.
pub async fn read_frame_async<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    boundary: &str,
    dest: Option<&mut [u8]>,
    skip_oversize: bool,
) -> Result<FrameRead> {
    let mut parser = HeadParser::new(boundary);
    let mut raw = Vec::with_capacity(128);

    let head = loop {
        if let Some(head) = parser.feed(read_line_async(reader, &mut raw).await?)? {
            break head;
        }
    };

    let length = match head {
        Head::EndOfStream => return Ok(FrameRead::EndOfStream),
        Head::Frame { length } => length,
    };

    let capacity = dest.as_ref().map_or(0, |d| d.len());
    let plan = plan_body(length, capacity, skip_oversize)?;
    let timestamp = SystemTime::now();

    match (plan, dest) {
        (BodyPlan::Store, Some(dest)) => read_body_async(reader, &mut dest[..length]).await?,
        _ => skip_body_async(reader, length).await?,
    }

    Ok(FrameRead::Frame(FrameInfo { timestamp, length }))
}

async fn read_body_async<R: AsyncBufRead + Unpin>(reader: &mut R, dest: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < dest.len() {
        let n = reader.read(&mut dest[filled..]).await?;
        if n == 0 {
            return Err(Error::Truncated {
                expected: dest.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

async fn skip_body_async<R: AsyncBufRead + Unpin>(reader: &mut R, length: usize) -> Result<()> {
    let mut left = length;
    while left > 0 {
        let available = reader.fill_buf().await?.len();
        if available == 0 {
            return Err(Error::Truncated {
                expected: length,
                received: length - left,
            });
        }
        let n = available.min(left);
        reader.consume(n);
        left -= n;
    }
    Ok(())
}
