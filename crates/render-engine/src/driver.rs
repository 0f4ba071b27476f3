//! Pipeline driver: the run loop that keeps decoder, compositor, encoder
//! and muxer in lock-step.
//!
//! ```text
//!  Configuring ──► Running ──► Draining ──► Finalizing ──► Complete
//!       │             │           │             │
//!       └─────────────┴───────────┴─────────────┴──────► Failed
//! ```
//!
//! One thread drives every stage. The only suspension point is the bounded
//! wait on the frame-available signal; everything else polls.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use veneer_common::{ExportDefaults, VeneerError, VeneerResult};
use veneer_media_model::{OverlayImage, TrackKind};

use crate::export::ExportStage;
use crate::mux::MuxSession;
use crate::progress::ProgressReporter;
use crate::signal::FrameSignal;
use crate::stage::{
    AudioSource, Compositor, DrainMode, FrameResult, FrameSink, FrameSource, GpuFrame, Muxer,
    SinkEvent,
};

#[cfg(test)]
mod tests;

/// Lifecycle of one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Configuring,
    Running,
    Draining,
    Finalizing,
    Complete,
    Failed,
}

/// Timeouts and stall limits for the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub frame_wait_timeout: Duration,
    pub dequeue_timeout: Duration,
    pub drain_timeout: Duration,
    /// Consecutive empty polls tolerated once input or encoding is finished.
    pub drain_stall_limit: u32,
    /// Consecutive frame-wait timeouts tolerated; 0 tolerates any number.
    pub max_consecutive_frame_timeouts: u32,
}

impl DriverOptions {
    pub fn from_defaults(defaults: &ExportDefaults) -> Self {
        Self {
            frame_wait_timeout: Duration::from_millis(defaults.frame_wait_timeout_ms),
            dequeue_timeout: Duration::from_millis(defaults.dequeue_timeout_ms),
            drain_timeout: Duration::from_millis(defaults.drain_timeout_ms),
            drain_stall_limit: defaults.drain_stall_limit.max(1),
            max_consecutive_frame_timeouts: defaults.max_consecutive_frame_timeouts,
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from_defaults(&ExportDefaults::default())
    }
}

/// What a finished export produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub frames_rendered: u64,
    pub video_samples: u64,
    pub audio_samples: u64,
    pub config_samples_skipped: u64,
    pub frame_wait_timeouts: u64,
    /// Span of rendered video, first to last frame plus one frame interval.
    pub duration_micros: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DrainOutcome {
    events: usize,
    end_of_stream: bool,
}

pub struct PipelineDriver<S, C, K, M: Muxer, A> {
    // Declaration order is drop order. Backends acquire stages in the
    // reverse: source, sink, compositor, muxer, audio.
    audio: Option<A>,
    mux: MuxSession<M>,
    compositor: C,
    sink: K,
    source: S,

    overlay: Option<OverlayImage>,
    signal: Arc<FrameSignal>,
    options: DriverOptions,
    progress: ProgressReporter,
    state: PipelineState,
    summary: PipelineSummary,
    consecutive_timeouts: u32,
    frame_interval_micros: i64,
    first_pts: Option<i64>,
    last_pts: Option<i64>,
}

impl<S, C, K, M, A> PipelineDriver<S, C, K, M, A>
where
    S: FrameSource,
    C: Compositor,
    K: FrameSink,
    M: Muxer<Format = K::Format>,
    A: AudioSource<Format = K::Format>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        compositor: C,
        sink: K,
        muxer: M,
        audio: Option<A>,
        overlay: OverlayImage,
        options: DriverOptions,
        progress: ProgressReporter,
    ) -> Self {
        let signal = source.frame_signal();
        let expect_audio = audio.is_some();
        Self {
            audio,
            mux: MuxSession::new(muxer, expect_audio),
            compositor,
            sink,
            source,
            overlay: Some(overlay),
            signal,
            options,
            progress,
            state: PipelineState::Configuring,
            summary: PipelineSummary::default(),
            consecutive_timeouts: 0,
            frame_interval_micros: 0,
            first_pts: None,
            last_pts: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn summary(&self) -> &PipelineSummary {
        &self.summary
    }

    /// Run to completion or failure, then release every stage.
    pub fn execute(mut self) -> VeneerResult<PipelineSummary> {
        let result = self.run();
        self.release();
        result
    }

    /// Run to completion or failure without releasing stages.
    pub fn run(&mut self) -> VeneerResult<PipelineSummary> {
        match self.run_stages() {
            Ok(()) => Ok(self.summary.clone()),
            Err(err) => {
                self.progress.halt();
                tracing::error!(
                    state = ?self.state,
                    stage = err.stage().as_str(),
                    frames = self.summary.frames_rendered,
                    error = %err,
                    "Pipeline failed"
                );
                self.transition(PipelineState::Failed);
                Err(err)
            }
        }
    }

    /// Drop every stage in reverse acquisition order.
    pub fn release(self) {
        let Self {
            audio,
            mux,
            compositor,
            sink,
            source,
            ..
        } = self;

        if let Some(audio) = audio {
            drop(audio);
            tracing::debug!("Released audio demuxer");
        }
        drop(mux);
        tracing::debug!("Released muxer");
        drop(compositor);
        tracing::debug!("Released compositor");
        drop(sink);
        tracing::debug!("Released encoder");
        drop(source);
        tracing::debug!("Released decoder");
    }

    fn run_stages(&mut self) -> VeneerResult<()> {
        self.configure()?;
        self.run_frames()?;
        self.drain()?;
        self.finalize()?;
        self.transition(PipelineState::Complete);
        self.progress.complete(self.summary.frames_rendered);
        Ok(())
    }

    fn configure(&mut self) -> VeneerResult<()> {
        let descriptor = self.source.descriptor().clone();
        descriptor.validate()?;

        if let Some(overlay) = self.overlay.take() {
            self.compositor.upload_overlay(&overlay)?;
        }

        self.frame_interval_micros = descriptor.frame_interval_micros();
        self.progress.set_total_frames(descriptor.estimated_frames());
        self.progress.setup_complete();

        tracing::info!(
            width = descriptor.width,
            height = descriptor.height,
            rotation = descriptor.rotation.degrees(),
            fps = descriptor.frame_rate,
            total_frames = self.progress.total_frames(),
            audio = self.audio.is_some(),
            "Pipeline configured"
        );
        self.transition(PipelineState::Running);
        Ok(())
    }

    fn run_frames(&mut self) -> VeneerResult<()> {
        let mut input_remaining = true;
        let mut idle_after_input = 0u32;

        loop {
            if input_remaining {
                input_remaining = self.source.pump_input()?;
            }

            match self.source.dequeue_frame(self.options.dequeue_timeout)? {
                FrameResult::Frame(frame) => {
                    idle_after_input = 0;
                    self.render_frame(frame)?;
                }
                FrameResult::TryAgain => {
                    // Keep the encoder moving while the decoder is busy.
                    self.drain_encoder(DrainMode::NonBlocking)?;
                    if !input_remaining {
                        idle_after_input += 1;
                        if idle_after_input >= self.options.drain_stall_limit {
                            return Err(VeneerError::decode(format!(
                                "decoder produced nothing in {idle_after_input} polls after end of input"
                            )));
                        }
                    }
                }
                FrameResult::FormatChanged => {
                    tracing::debug!("Decoder output format changed");
                }
                FrameResult::EndOfStream => {
                    tracing::debug!(
                        frames = self.summary.frames_rendered,
                        "Decoder reached end of stream"
                    );
                    self.sink.signal_end_of_input()?;
                    self.transition(PipelineState::Draining);
                    self.progress
                        .stage(ExportStage::Encoding, self.summary.frames_rendered);
                    return Ok(());
                }
            }
        }
    }

    fn render_frame(&mut self, frame: GpuFrame) -> VeneerResult<()> {
        let pts = frame.pts_micros();

        if self.signal.wait(self.options.frame_wait_timeout) {
            self.consecutive_timeouts = 0;
        } else {
            self.summary.frame_wait_timeouts += 1;
            self.consecutive_timeouts += 1;
            tracing::warn!(
                pts_us = pts,
                consecutive = self.consecutive_timeouts,
                timeout_ms = self.options.frame_wait_timeout.as_millis() as u64,
                "Timed out waiting for decoded frame; compositing anyway"
            );
            let limit = self.options.max_consecutive_frame_timeouts;
            if limit > 0 && self.consecutive_timeouts > limit {
                return Err(VeneerError::decode(format!(
                    "no decoded frame became available in {} consecutive waits",
                    self.consecutive_timeouts
                )));
            }
        }

        self.compositor.composite(frame)?;
        self.summary.frames_rendered += 1;
        self.first_pts.get_or_insert(pts);
        self.last_pts = Some(self.last_pts.map_or(pts, |last| last.max(pts)));
        self.progress.frames(self.summary.frames_rendered);

        self.drain_encoder(DrainMode::NonBlocking)?;
        Ok(())
    }

    fn drain(&mut self) -> VeneerResult<()> {
        let mut idle = 0u32;
        loop {
            let outcome = self.drain_encoder(DrainMode::Blocking(self.options.drain_timeout))?;
            if outcome.end_of_stream {
                break;
            }
            if outcome.events == 0 {
                idle += 1;
                if idle >= self.options.drain_stall_limit {
                    return Err(VeneerError::encode(format!(
                        "encoder did not reach end of stream after {idle} empty drains"
                    )));
                }
            } else {
                idle = 0;
            }
        }

        if !self.mux.is_started() {
            return Err(VeneerError::encode(
                "encoder finished without reporting an output format",
            ));
        }
        if self.summary.frames_rendered == 0 {
            return Err(VeneerError::encode("no frames produced"));
        }
        Ok(())
    }

    fn finalize(&mut self) -> VeneerResult<()> {
        self.transition(PipelineState::Finalizing);
        self.progress
            .stage(ExportStage::Finalizing, self.summary.frames_rendered);

        if let Some(audio) = self.audio.as_mut() {
            while let Some(sample) = audio.next_sample()? {
                self.mux.write(TrackKind::Audio, &sample)?;
            }
        }
        self.mux.finalize()?;

        let stats = self.mux.stats();
        self.summary.video_samples = stats.video_samples;
        self.summary.audio_samples = stats.audio_samples;
        self.summary.config_samples_skipped = stats.config_samples;
        if let (Some(first), Some(last)) = (self.first_pts, self.last_pts) {
            self.summary.duration_micros = last - first + self.frame_interval_micros;
        }

        tracing::info!(
            frames = self.summary.frames_rendered,
            video_samples = stats.video_samples,
            audio_samples = stats.audio_samples,
            duration_us = self.summary.duration_micros,
            "Muxer finalized"
        );
        Ok(())
    }

    fn drain_encoder(&mut self, mode: DrainMode) -> VeneerResult<DrainOutcome> {
        let events = self.sink.drain(mode)?;
        let mut outcome = DrainOutcome {
            events: events.len(),
            end_of_stream: false,
        };

        for event in events {
            match event {
                SinkEvent::FormatChanged(format) => self.bind_tracks(format)?,
                SinkEvent::AccessUnit(sample) => {
                    if outcome.end_of_stream {
                        return Err(VeneerError::encode(
                            "encoder produced output after end of stream",
                        ));
                    }
                    self.mux.write(TrackKind::Video, &sample)?;
                }
                SinkEvent::EndOfStream => outcome.end_of_stream = true,
            }
        }
        Ok(outcome)
    }

    /// Bind the video track from the encoder's format, and the audio track
    /// right after it so the muxer can start.
    fn bind_tracks(&mut self, format: K::Format) -> VeneerResult<()> {
        if self.mux.binding(TrackKind::Video).is_some() {
            return Err(VeneerError::encode(
                "encoder changed its output format mid-stream",
            ));
        }
        tracing::debug!("Encoder reported output format");
        self.mux.bind(TrackKind::Video, format)?;
        if let Some(audio) = &self.audio {
            self.mux.bind(TrackKind::Audio, audio.format())?;
        }
        Ok(())
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::info!(
            from = ?self.state,
            state = ?next,
            frames = self.summary.frames_rendered,
            "Pipeline state"
        );
        self.state = next;
    }
}
