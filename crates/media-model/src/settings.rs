//! Encoder configuration derived from the output geometry and defaults.

use serde::{Deserialize, Serialize};
use veneer_common::ExportDefaults;

use crate::geometry::OutputGeometry;

/// Everything a `FrameSink` needs to configure its encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub geometry: OutputGeometry,
    /// Bits per second.
    pub bitrate: u64,
    pub frame_rate: f64,
    pub key_frame_interval_secs: u32,
    /// Encoder names, tried in order.
    pub encoders: Vec<String>,
}

impl EncoderSettings {
    pub fn new(geometry: OutputGeometry, frame_rate: f64, defaults: &ExportDefaults) -> Self {
        Self {
            geometry,
            bitrate: defaults.bitrate_for(geometry.width, geometry.height),
            frame_rate,
            key_frame_interval_secs: defaults.key_frame_interval_secs,
            encoders: defaults.encoders.clone(),
        }
    }

    /// Frames between key frames, at least 1.
    pub fn gop_size(&self) -> u32 {
        let frames = (self.frame_rate * f64::from(self.key_frame_interval_secs)).ceil();
        if frames.is_finite() && frames >= 1.0 {
            frames as u32
        } else {
            1
        }
    }
}
