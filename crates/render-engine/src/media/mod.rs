//! FFmpeg-backed pipeline stages.

mod audio;
mod hw;
mod muxer;
mod probe;
mod sink;
mod source;

use std::sync::Once;

use ffmpeg_next::Rational;
use veneer_common::{VeneerError, VeneerResult, MICROS_PER_SEC};

pub use audio::FfmpegAudioTrack;
pub use muxer::{FfmpegMuxer, StreamFormat};
pub use probe::{available_encoders, probe_media};
pub use sink::FfmpegFrameSink;
pub use source::FfmpegFrameSource;

/// Time base of every timestamp that crosses a stage boundary.
pub(crate) const MICROS: Rational = Rational(1, MICROS_PER_SEC as i32);

static INIT: Once = Once::new();

/// Initialise the FFmpeg libraries and quieten their logging. Safe to call
/// any number of times.
pub fn init() -> VeneerResult<()> {
    ffmpeg_next::init()
        .map_err(|e| VeneerError::decode_init(format!("failed to initialise FFmpeg: {e}")))?;
    INIT.call_once(|| {
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);
        tracing::debug!(
            version = ffmpeg_next::util::version(),
            "FFmpeg libraries initialised"
        );
    });
    Ok(())
}

/// Whether `err` is FFmpeg's "try again" status.
pub(crate) fn is_again(err: &ffmpeg_next::Error) -> bool {
    matches!(err, ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN)
}
