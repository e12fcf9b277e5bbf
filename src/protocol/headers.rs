//! Header sets
//!
//! Holds the per-frame header block (`name: value` lines up to an empty line)
//! and the response headers handed over by a connector. Names are case-folded
//! and repeated names keep every value in arrival order.

use std::collections::HashMap;

use crate::error::FramingError;

/// Case-insensitive multi-valued header map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: HashMap<String, Vec<String>>,
}

impl HeaderSet {
    /// Create an empty header set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value; the name is lower-cased
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Parse a `name: value` line and append it
    pub fn insert_line(&mut self, line: &str) -> std::result::Result<(), FramingError> {
        let (name, value) = parse_header_line(line)?;
        self.entries.entry(name).or_default().push(value);
        Ok(())
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for `name`, in arrival order
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mandatory `Content-Length` of a frame
    pub fn content_length(&self) -> std::result::Result<usize, FramingError> {
        let value = self.get("content-length");
        value
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| FramingError::InvalidContentLength(value.map(str::to_owned)))
    }

    /// Check the media type of `Content-Type`, ignoring any parameters
    pub fn expect_content_type(&self, expected: &str) -> std::result::Result<(), FramingError> {
        let value = self
            .get("content-type")
            .ok_or(FramingError::MissingContentType)?;
        let media_type = media_type(value);
        if media_type != expected {
            return Err(FramingError::WrongContentType(media_type.to_owned()));
        }
        Ok(())
    }
}

/// Split a header line into lower-cased name and trimmed value
pub fn parse_header_line(line: &str) -> std::result::Result<(String, String), FramingError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| FramingError::InvalidHeaderLine(line.to_owned()))?;
    Ok((name.trim().to_ascii_lowercase(), value.trim().to_owned()))
}

/// Media type of a `Content-Type` value, without the `;` parameter suffix
pub fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}
