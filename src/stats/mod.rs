//! Stream statistics and frame rate estimation

pub mod metrics;

pub use metrics::{FpsMeter, StreamStats};
