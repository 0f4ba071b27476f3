//! Pipeline stage contracts.
//!
//! The driver is generic over these traits so the run loop can be exercised
//! with in-memory stages. Production implementations live in
//! [`crate::media`] (FFmpeg) and [`crate::compositor`] (wgpu).

use std::sync::Arc;
use std::time::Duration;

use veneer_common::VeneerResult;
use veneer_media_model::{MediaDescriptor, OverlayImage, Sample, TrackKind};

use crate::signal::FrameSignal;

/// Opaque token for a decoded frame resident in the video surface.
///
/// Not `Clone`: a frame is handed from the source to the compositor by
/// value and is gone once composited.
#[derive(Debug, PartialEq, Eq)]
pub struct GpuFrame {
    pts_micros: i64,
    sequence: u64,
}

impl GpuFrame {
    pub(crate) fn new(pts_micros: i64, sequence: u64) -> Self {
        Self {
            pts_micros,
            sequence,
        }
    }

    /// Presentation timestamp in microseconds.
    pub fn pts_micros(&self) -> i64 {
        self.pts_micros
    }

    /// Position of this frame in decode output order, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Outcome of asking the decoder for one frame.
#[derive(Debug)]
pub enum FrameResult {
    Frame(GpuFrame),
    /// Nothing ready yet; feed more input or drain the encoder.
    TryAgain,
    /// The decoded picture format became known or changed.
    FormatChanged,
    EndOfStream,
}

/// How long [`FrameSink::drain`] may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    NonBlocking,
    Blocking(Duration),
}

/// Output of the encoder, in order.
#[derive(Debug)]
pub enum SinkEvent<F> {
    /// The encoder's real output format; emitted once, before any sample.
    FormatChanged(F),
    AccessUnit(Sample),
    EndOfStream,
}

/// Demuxer + decoder delivering frames into the compositor's video surface.
pub trait FrameSource {
    fn descriptor(&self) -> &MediaDescriptor;

    /// Signal raised when a published frame's pixels are on the GPU.
    fn frame_signal(&self) -> Arc<FrameSignal>;

    /// Feed currently available compressed input without blocking.
    /// Returns whether more input remains.
    fn pump_input(&mut self) -> VeneerResult<bool>;

    fn dequeue_frame(&mut self, timeout: Duration) -> VeneerResult<FrameResult>;
}

/// Blends the overlay over each video frame into the encoder's surface.
pub trait Compositor {
    /// Upload the overlay texture. Repeated calls after the first are no-ops.
    fn upload_overlay(&mut self, overlay: &OverlayImage) -> VeneerResult<()>;

    /// Draw video then overlay, and present with the frame's timestamp.
    fn composite(&mut self, frame: GpuFrame) -> VeneerResult<()>;
}

/// Encoder consuming presented frames from its input surface.
pub trait FrameSink {
    type Format;

    fn signal_end_of_input(&mut self) -> VeneerResult<()>;

    fn drain(&mut self, mode: DrainMode) -> VeneerResult<Vec<SinkEvent<Self::Format>>>;
}

/// Container writer.
pub trait Muxer {
    type Format;

    fn add_track(&mut self, kind: TrackKind, format: &Self::Format) -> VeneerResult<usize>;

    fn start(&mut self) -> VeneerResult<()>;

    fn write_sample(&mut self, track_index: usize, sample: &Sample) -> VeneerResult<()>;

    fn finalize(&mut self) -> VeneerResult<()>;
}

/// Source of passthrough audio samples, copied without re-encoding.
pub trait AudioSource {
    type Format;

    /// The input track's native format.
    fn format(&self) -> Self::Format;

    /// Next sample in source order, or `None` at end of track.
    fn next_sample(&mut self) -> VeneerResult<Option<Sample>>;
}
