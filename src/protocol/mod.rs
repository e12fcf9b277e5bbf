//! MJPEG-over-HTTP wire protocol
//!
//! A stream is a `multipart/x-mixed-replace` response body. Each frame is a
//! delimiter line, a header block and a body whose size is given by the
//! mandatory `Content-Length`:
//!
//! ```text
//! --<boundary>
//! Content-Type: image/jpeg
//! Content-Length: <N>
//!
//! <N bytes of JPEG data>
//! ```
//!
//! Lines may end with `\r\n` or `\n`. A frame with `Content-Length: 0` marks
//! the end of the stream.

pub mod boundary;
pub mod headers;
pub mod reader;

pub use boundary::negotiate_boundary;
pub use headers::HeaderSet;
pub use reader::{read_frame, read_frame_async, FrameInfo, FrameRead};

/// Media type every frame must carry
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Media type of the response carrying the stream
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace";

/// The only status accepted for a stream response
pub const HTTP_OK: u16 = 200;

/// Longest accepted delimiter, header or status line, terminator included
pub const MAX_LINE_LENGTH: usize = 8 * 1024;
