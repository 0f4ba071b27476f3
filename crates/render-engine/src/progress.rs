//! Monotonic progress reporting.
//!
//! Layout of the `[0, 1]` range: [`SETUP_FRACTION`] once the pipeline is
//! configured, then frames produced over the estimated total scaled into
//! the next [`FRAMES_FRACTION`], and exactly `1.0` on completion. Values
//! never decrease, and nothing is emitted after [`ProgressReporter::halt`].

use veneer_common::ExportClock;

use crate::export::{ExportProgress, ExportStage, ProgressCallback};

pub const SETUP_FRACTION: f64 = 0.05;
pub const FRAMES_FRACTION: f64 = 0.90;

/// Smallest increase worth a callback when the stage is unchanged.
const MIN_STEP: f64 = 0.001;

pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total_frames: u64,
    last: Option<(f64, ExportStage)>,
    clock: ExportClock,
    halted: bool,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            total_frames: 0,
            last: None,
            clock: ExportClock::start(),
            halted: false,
        }
    }

    pub fn set_total_frames(&mut self, total_frames: u64) {
        self.total_frames = total_frames.max(1);
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Configuration finished.
    pub fn setup_complete(&mut self) {
        self.emit(SETUP_FRACTION, ExportStage::Preparing, 0);
    }

    /// `rendered` frames have been composited and handed to the encoder.
    pub fn frames(&mut self, rendered: u64) {
        let fraction = rendered as f64 / self.total_frames.max(1) as f64;
        self.fraction(fraction, ExportStage::Rendering, rendered);
    }

    /// Report `fraction` of the frame work done, for backends that measure
    /// progress by time rather than frame count.
    pub fn fraction(&mut self, fraction: f64, stage: ExportStage, rendered: u64) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.emit(SETUP_FRACTION + FRAMES_FRACTION * fraction, stage, rendered);
    }

    /// Enter a new stage without advancing the fraction.
    pub fn stage(&mut self, stage: ExportStage, rendered: u64) {
        let current = self.last.map(|(value, _)| value).unwrap_or(0.0);
        self.emit(current, stage, rendered);
    }

    pub fn complete(&mut self, rendered: u64) {
        self.emit(1.0, ExportStage::Complete, rendered);
    }

    /// Stop reporting; used when the export fails.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    fn emit(&mut self, value: f64, stage: ExportStage, rendered: u64) {
        if self.halted {
            return;
        }
        let previous = self.last.map(|(value, _)| value).unwrap_or(0.0);
        let value = value.clamp(previous, 1.0);
        if let Some((last_value, last_stage)) = self.last {
            let complete = stage == ExportStage::Complete;
            if last_stage == stage && value - last_value < MIN_STEP && !complete {
                return;
            }
            if last_stage == ExportStage::Complete {
                return;
            }
        }
        self.last = Some((value, stage));

        let Some(callback) = &self.callback else {
            return;
        };
        let eta_secs = if stage == ExportStage::Complete {
            0.0
        } else {
            self.clock
                .eta_secs(rendered, self.total_frames)
                .unwrap_or(0.0)
        };
        callback(ExportProgress {
            progress: value,
            frames_rendered: rendered,
            total_frames: self.total_frames,
            eta_secs,
            stage,
        });
    }
}
