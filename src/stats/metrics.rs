//! Statistics for MJPEG client streams

use std::fmt;
use std::time::{Duration, Instant};

/// Smallest accepted fps window
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Snapshot of a client's counters
///
/// Counters cover the lifetime of the client, across reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Stream URL
    pub url: String,
    /// Frame rate measured over the last completed window
    pub fps: u64,
    /// Number of transitions into the overrun state
    pub overruns: u64,
    /// Reconnect attempts made
    pub reconnects: u64,
    /// Frames received, delivered or not
    pub frames: u64,
    /// Frames dropped for lack of a (large enough) buffer
    pub discarded_frames: u64,
    /// Whether the client is currently out of free buffers
    pub in_overrun: bool,
    /// Buffers available for writing at snapshot time
    pub free_buffers: usize,
}

impl StreamStats {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Frames handed to the consumer
    pub fn delivered_frames(&self) -> u64 {
        self.frames - self.discarded_frames
    }
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MJPEGClient:")?;
        writeln!(f, "  URL:            : {}", self.url)?;
        writeln!(f, "  FPS             : {}", self.fps)?;
        writeln!(f, "  Buffer overruns : {}", self.overruns)?;
        writeln!(f, "  Reconnects      : {}", self.reconnects)?;
        writeln!(f, "  Total frames    : {}", self.frames)?;
        writeln!(f, "  Discarded frames: {}", self.discarded_frames)?;
        write!(f, "  Buffer queue    : {}", self.free_buffers)
    }
}

/// Fixed-window frame rate estimator
///
/// Counts frames in windows of `interval`. When a frame arrives after the
/// window has elapsed, the estimate becomes `frames / interval` (truncated)
/// and the window advances by whole intervals, so it never drifts by more
/// than one interval from the clock.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    interval: Duration,
    window_start: Instant,
    frames: u64,
    fps: u64,
}

impl FpsMeter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            window_start: now,
            frames: 0,
            fps: 0,
        }
    }

    /// Start a fresh window, keeping the last estimate
    pub fn restart(&mut self, now: Instant) {
        self.window_start = now;
        self.frames = 0;
    }

    /// Count one frame arriving at `now`.
    ///
    /// Returns the new estimate when a window was completed.
    pub fn record(&mut self, now: Instant) -> Option<u64> {
        let elapsed = now.saturating_duration_since(self.window_start);
        let windows = elapsed.as_nanos() / self.interval.as_nanos();

        let rolled = if windows > 0 {
            // Windows after the first one passed without any frame
            self.fps = if windows == 1 {
                (self.frames as f64 / self.interval.as_secs_f64()) as u64
            } else {
                0
            };
            let advance = self.interval.as_nanos() * windows;
            self.window_start += Duration::from_nanos(advance.min(u64::MAX as u128) as u64);
            self.frames = 0;
            Some(self.fps)
        } else {
            None
        };

        self.frames += 1;
        rolled
    }

    /// Last computed estimate
    pub fn fps(&self) -> u64 {
        self.fps
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
