//! Output tracks and the compressed samples written into them.

use serde::{Deserialize, Serialize};

/// Kind of an output track. An export has one video track and at most
/// one audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// A muxer track created from a producer's reported output format.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackBinding<F> {
    pub kind: TrackKind,
    pub track_index: usize,
    pub format: F,
}

/// Per-sample flags carried alongside compressed data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags {
    pub key_frame: bool,
    /// Decoder configuration (SPS/PPS, AudioSpecificConfig). Already
    /// carried by the track format, never written as payload.
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl SampleFlags {
    pub const KEY_FRAME: SampleFlags = SampleFlags {
        key_frame: true,
        codec_config: false,
        end_of_stream: false,
    };

    pub const CODEC_CONFIG: SampleFlags = SampleFlags {
        key_frame: false,
        codec_config: true,
        end_of_stream: false,
    };
}

/// One compressed access unit, timestamps in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub data: Vec<u8>,
    pub pts_micros: i64,
    pub dts_micros: Option<i64>,
    pub duration_micros: i64,
    pub flags: SampleFlags,
}

impl Sample {
    pub fn new(data: Vec<u8>, pts_micros: i64) -> Self {
        Self {
            data,
            pts_micros,
            dts_micros: None,
            duration_micros: 0,
            flags: SampleFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: SampleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_dts(mut self, dts_micros: i64) -> Self {
        self.dts_micros = Some(dts_micros);
        self
    }

    pub fn with_duration(mut self, duration_micros: i64) -> Self {
        self.duration_micros = duration_micros;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
