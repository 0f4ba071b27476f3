//! Clock and timing utilities for the export pipeline.
//!
//! All Veneer timestamps are microseconds. This module provides:
//! - Conversions between seconds, microseconds and frame counts
//! - Monotonic presentation timestamps for the encoder
//! - A wall-clock stopwatch for ETA reporting

use std::time::{Duration, Instant};

pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Convert microseconds to seconds.
pub fn micros_to_secs(us: i64) -> f64 {
    us as f64 / MICROS_PER_SEC as f64
}

/// Convert seconds to microseconds, truncating.
pub fn secs_to_micros(secs: f64) -> i64 {
    (secs * MICROS_PER_SEC as f64) as i64
}

/// Duration of one frame at `fps`, in microseconds.
pub fn frame_interval_micros(fps: f64) -> i64 {
    if fps <= 0.0 {
        return 0;
    }
    (MICROS_PER_SEC as f64 / fps).round() as i64
}

/// Estimated frame count for a stream: `duration * fps`, at least 1.
pub fn estimate_total_frames(duration_micros: i64, fps: f64) -> u64 {
    if duration_micros <= 0 || fps <= 0.0 {
        return 1;
    }
    (micros_to_secs(duration_micros) * fps).round().max(1.0) as u64
}

/// Forces a stream of presentation timestamps to be strictly increasing.
///
/// Decoders occasionally repeat or reorder timestamps around edits; the
/// muxer rejects non-increasing DTS, so each value is bumped past the
/// previous one when needed.
#[derive(Debug, Default)]
pub struct MonotonicTimestamps {
    last_us: Option<i64>,
}

impl MonotonicTimestamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `pts_us`, or one microsecond past the last value returned.
    pub fn next(&mut self, pts_us: i64) -> i64 {
        let pts = match self.last_us {
            Some(last) if pts_us <= last => last + 1,
            _ => pts_us,
        };
        self.last_us = Some(pts);
        pts
    }

    pub fn last(&self) -> Option<i64> {
        self.last_us
    }
}

/// Wall-clock stopwatch used for throughput and ETA estimates.
#[derive(Debug, Clone)]
pub struct ExportClock {
    started: Instant,
}

impl ExportClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Seconds remaining given `done` of `total` units completed so far.
    pub fn eta_secs(&self, done: u64, total: u64) -> Option<f64> {
        eta_from_elapsed(self.elapsed().as_secs_f64(), done, total)
    }
}

fn eta_from_elapsed(elapsed_secs: f64, done: u64, total: u64) -> Option<f64> {
    if done == 0 || elapsed_secs <= 0.0 {
        return None;
    }
    let rate = done as f64 / elapsed_secs;
    Some(total.saturating_sub(done) as f64 / rate)
}
