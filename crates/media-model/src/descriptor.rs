//! Source media description, derived once from the input's video track.

use serde::{Deserialize, Serialize};
use veneer_common::{estimate_total_frames, frame_interval_micros, VeneerError, VeneerResult};

use crate::geometry::OutputGeometry;

/// Clockwise display rotation of a video track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [Self::None, Self::Cw90, Self::Cw180, Self::Cw270];

    /// Exact quarter-turn rotations only; anything else is rejected.
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::None),
            90 => Some(Self::Cw90),
            180 => Some(Self::Cw180),
            270 => Some(Self::Cw270),
            _ => None,
        }
    }

    /// Snap an arbitrary angle to the nearest quarter turn.
    pub fn nearest(degrees: f64) -> Self {
        let quarter = (degrees.rem_euclid(360.0) / 90.0).round() as i64;
        match quarter.rem_euclid(4) {
            1 => Self::Cw90,
            2 => Self::Cw180,
            3 => Self::Cw270,
            _ => Self::None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }

    /// Whether displaying the frame swaps its width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Cw90 | Self::Cw270)
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_degrees(i64::from(value))
            .ok_or_else(|| format!("rotation must be 0, 90, 180 or 270, got {value}"))
    }
}

impl From<Rotation> for u32 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

/// Immutable description of the source video track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Coded (natural) frame width in pixels, before rotation.
    pub width: u32,
    /// Coded (natural) frame height in pixels, before rotation.
    pub height: u32,
    pub rotation: Rotation,
    pub duration_micros: i64,
    pub frame_rate: f64,
    /// e.g. "video/avc".
    pub mime_type: String,
}

impl MediaDescriptor {
    pub fn validate(&self) -> VeneerResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(VeneerError::no_video_track(format!(
                "video track reports {}x{} frames",
                self.width, self.height
            )));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(VeneerError::decode_init(format!(
                "invalid frame rate {}",
                self.frame_rate
            )));
        }
        Ok(())
    }

    /// Width and height as displayed, after applying rotation.
    pub fn display_size(&self) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    pub fn output_geometry(&self) -> VeneerResult<OutputGeometry> {
        OutputGeometry::for_source(self.width, self.height, self.rotation)
    }

    /// `duration * frame_rate`, used as the progress denominator.
    pub fn estimated_frames(&self) -> u64 {
        estimate_total_frames(self.duration_micros, self.frame_rate)
    }

    pub fn frame_interval_micros(&self) -> i64 {
        frame_interval_micros(self.frame_rate)
    }
}

/// Everything `probe` learns about an input without exporting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    pub descriptor: MediaDescriptor,
    pub output: OutputGeometry,
    pub container: String,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub estimated_frames: u64,
}

impl MediaProbe {
    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }
}
