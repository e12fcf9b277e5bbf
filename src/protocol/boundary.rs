//! Boundary negotiation
//!
//! The delimiter line preceding every frame is derived once per connection
//! from the `boundary` parameter of the response's `Content-Type`:
//!
//! ```text
//! HTTP/1.0 200 OK
//! Content-Type: multipart/x-mixed-replace; boundary=herebedragons
//!
//! --herebedragons
//! Content-Type: image/jpeg
//! Content-Length: 1234
//! ```

use crate::error::{Error, FramingError, Result};

use super::headers::HeaderSet;
use super::HTTP_OK;

/// Validate the response metadata and return the delimiter line.
///
/// The status must be exactly 200 and the `Content-Type` header must carry a
/// `boundary` parameter. The returned token already includes the `--` prefix.
pub fn negotiate_boundary(status: u16, headers: &HeaderSet) -> Result<String> {
    if status != HTTP_OK {
        return Err(Error::Connection(format!(
            "invalid response from server: {status}"
        )));
    }

    let content_type = headers
        .get("content-type")
        .ok_or(FramingError::MissingContentType)?;

    let boundary =
        boundary_param(content_type).ok_or(FramingError::MissingBoundaryParameter)?;

    Ok(format!("--{boundary}"))
}

/// Extract the (unquoted) `boundary` parameter of a `Content-Type` value
pub fn boundary_param(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .filter(|value| !value.is_empty())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
