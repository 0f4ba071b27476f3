use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::{MediaDescriptor, OverlayImage, Rotation, Sample, SampleFlags, TrackKind};

use super::*;
use crate::export::ExportProgress;

type Log = Arc<Mutex<Vec<String>>>;

fn log_line(log: &Log, line: impl Into<String>) {
    log.lock().push(line.into());
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Frame(i64),
    TryAgain,
    FormatChanged,
}

struct FakeSource {
    descriptor: MediaDescriptor,
    signal: Arc<FrameSignal>,
    packets: usize,
    script: VecDeque<Step>,
    /// Returned once the script is exhausted.
    exhausted: fn() -> FrameResult,
    raise_signal: bool,
    sequence: u64,
    log: Log,
}

impl FakeSource {
    fn new(log: &Log, steps: &[Step]) -> Self {
        Self {
            descriptor: MediaDescriptor {
                width: 640,
                height: 360,
                rotation: Rotation::None,
                duration_micros: steps
                    .iter()
                    .filter(|s| matches!(s, Step::Frame(_)))
                    .count() as i64
                    * 40_000,
                frame_rate: 25.0,
                mime_type: "video/avc".to_string(),
            },
            signal: Arc::new(FrameSignal::new()),
            packets: steps.len(),
            script: steps.iter().copied().collect(),
            exhausted: || FrameResult::EndOfStream,
            raise_signal: true,
            sequence: 0,
            log: Arc::clone(log),
        }
    }

    fn frames(log: &Log, count: usize) -> Self {
        let steps: Vec<Step> = (0..count as i64).map(|i| Step::Frame(i * 40_000)).collect();
        Self::new(log, &steps)
    }
}

impl FrameSource for FakeSource {
    fn descriptor(&self) -> &MediaDescriptor {
        &self.descriptor
    }

    fn frame_signal(&self) -> Arc<FrameSignal> {
        Arc::clone(&self.signal)
    }

    fn pump_input(&mut self) -> VeneerResult<bool> {
        self.packets = self.packets.saturating_sub(1);
        Ok(self.packets > 0)
    }

    fn dequeue_frame(&mut self, _timeout: Duration) -> VeneerResult<FrameResult> {
        match self.script.pop_front() {
            Some(Step::Frame(pts)) => {
                if self.raise_signal {
                    self.signal.notify();
                }
                let frame = GpuFrame::new(pts, self.sequence);
                self.sequence += 1;
                Ok(FrameResult::Frame(frame))
            }
            Some(Step::TryAgain) => Ok(FrameResult::TryAgain),
            Some(Step::FormatChanged) => Ok(FrameResult::FormatChanged),
            None => Ok((self.exhausted)()),
        }
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        log_line(&self.log, "release source");
    }
}

/// Stands in for the encoder input surface shared by compositor and sink.
type Surface = Arc<Mutex<VecDeque<i64>>>;

struct FakeCompositor {
    surface: Surface,
    uploads: u32,
    fail_at: Option<u64>,
    composited: u64,
    log: Log,
}

impl FakeCompositor {
    fn new(log: &Log, surface: &Surface) -> Self {
        Self {
            surface: Arc::clone(surface),
            uploads: 0,
            fail_at: None,
            composited: 0,
            log: Arc::clone(log),
        }
    }
}

impl Compositor for FakeCompositor {
    fn upload_overlay(&mut self, overlay: &OverlayImage) -> VeneerResult<()> {
        if self.uploads == 0 {
            log_line(&self.log, format!("upload {}x{}", overlay.width(), overlay.height()));
        }
        self.uploads += 1;
        Ok(())
    }

    fn composite(&mut self, frame: GpuFrame) -> VeneerResult<()> {
        if self.fail_at == Some(frame.sequence()) {
            return Err(VeneerError::compositor_init("device lost"));
        }
        log_line(&self.log, format!("composite {}", frame.pts_micros()));
        self.surface.lock().push_back(frame.pts_micros());
        self.composited += 1;
        Ok(())
    }
}

impl Drop for FakeCompositor {
    fn drop(&mut self) {
        log_line(&self.log, "release compositor");
    }
}

struct FakeSink {
    surface: Surface,
    format_sent: bool,
    config_sample: bool,
    end_requested: bool,
    end_sent: bool,
    never_finish: bool,
    extra_format_change: bool,
    log: Log,
}

impl FakeSink {
    fn new(log: &Log, surface: &Surface) -> Self {
        Self {
            surface: Arc::clone(surface),
            format_sent: false,
            config_sample: false,
            end_requested: false,
            end_sent: false,
            never_finish: false,
            extra_format_change: false,
            log: Arc::clone(log),
        }
    }
}

impl FrameSink for FakeSink {
    type Format = &'static str;

    fn signal_end_of_input(&mut self) -> VeneerResult<()> {
        log_line(&self.log, "end of input");
        self.end_requested = true;
        Ok(())
    }

    fn drain(&mut self, mode: DrainMode) -> VeneerResult<Vec<SinkEvent<&'static str>>> {
        let mut events = Vec::new();
        let mut pending = self.surface.lock();

        if !self.format_sent && (!pending.is_empty() || self.end_requested) {
            self.format_sent = true;
            events.push(SinkEvent::FormatChanged("h264"));
            if self.config_sample {
                events.push(SinkEvent::AccessUnit(
                    Sample::new(vec![0, 0, 0, 1, 0x67], 0).with_flags(SampleFlags::CODEC_CONFIG),
                ));
            }
        } else if self.extra_format_change && !pending.is_empty() {
            events.push(SinkEvent::FormatChanged("h264-high"));
        }

        while let Some(pts) = pending.pop_front() {
            events.push(SinkEvent::AccessUnit(
                Sample::new(vec![0x65; 16], pts).with_flags(SampleFlags::KEY_FRAME),
            ));
        }

        if self.end_requested
            && !self.end_sent
            && !self.never_finish
            && matches!(mode, DrainMode::Blocking(_))
        {
            self.end_sent = true;
            events.push(SinkEvent::EndOfStream);
        }
        Ok(events)
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        log_line(&self.log, "release sink");
    }
}

struct FakeMuxer {
    fail_writes: bool,
    log: Log,
}

impl FakeMuxer {
    fn new(log: &Log) -> Self {
        Self {
            fail_writes: false,
            log: Arc::clone(log),
        }
    }
}

impl Muxer for FakeMuxer {
    type Format = &'static str;

    fn add_track(&mut self, kind: TrackKind, format: &&'static str) -> VeneerResult<usize> {
        log_line(&self.log, format!("add {kind} {format}"));
        Ok(match kind {
            TrackKind::Video => 0,
            TrackKind::Audio => 1,
        })
    }

    fn start(&mut self) -> VeneerResult<()> {
        log_line(&self.log, "start");
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &Sample) -> VeneerResult<()> {
        if self.fail_writes {
            return Err(VeneerError::mux_write("disk full"));
        }
        log_line(
            &self.log,
            format!("write {track_index} {} {}", sample.pts_micros, sample.len()),
        );
        Ok(())
    }

    fn finalize(&mut self) -> VeneerResult<()> {
        log_line(&self.log, "finalize");
        Ok(())
    }
}

impl Drop for FakeMuxer {
    fn drop(&mut self) {
        log_line(&self.log, "release muxer");
    }
}

struct FakeAudio {
    samples: VecDeque<i64>,
    log: Log,
}

impl FakeAudio {
    fn new(log: &Log, count: usize) -> Self {
        Self {
            samples: (0..count as i64).map(|i| i * 21_333).collect(),
            log: Arc::clone(log),
        }
    }
}

impl AudioSource for FakeAudio {
    type Format = &'static str;

    fn format(&self) -> &'static str {
        "aac"
    }

    fn next_sample(&mut self) -> VeneerResult<Option<Sample>> {
        Ok(self
            .samples
            .pop_front()
            .map(|pts| Sample::new(vec![0x21; 6], pts)))
    }
}

impl Drop for FakeAudio {
    fn drop(&mut self) {
        log_line(&self.log, "release audio");
    }
}

fn options() -> DriverOptions {
    DriverOptions {
        frame_wait_timeout: Duration::from_millis(5),
        dequeue_timeout: Duration::ZERO,
        drain_timeout: Duration::from_millis(1),
        drain_stall_limit: 3,
        max_consecutive_frame_timeouts: 5,
    }
}

fn overlay() -> OverlayImage {
    OverlayImage::transparent(64, 36).unwrap()
}

fn recorder() -> (ProgressReporter, Arc<Mutex<Vec<ExportProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (
        ProgressReporter::new(Some(Box::new(move |p| sink.lock().push(p)))),
        seen,
    )
}

struct Harness {
    log: Log,
    source: FakeSource,
    compositor: FakeCompositor,
    sink: FakeSink,
    muxer: FakeMuxer,
    audio: Option<FakeAudio>,
}

impl Harness {
    fn new(source: impl FnOnce(&Log) -> FakeSource) -> Self {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let surface: Surface = Arc::new(Mutex::new(VecDeque::new()));
        Self {
            source: source(&log),
            compositor: FakeCompositor::new(&log, &surface),
            sink: FakeSink::new(&log, &surface),
            muxer: FakeMuxer::new(&log),
            audio: None,
            log,
        }
    }

    fn with_audio(mut self, samples: usize) -> Self {
        self.audio = Some(FakeAudio::new(&self.log, samples));
        self
    }

    fn run(
        self,
        options: DriverOptions,
    ) -> (
        VeneerResult<PipelineSummary>,
        Vec<String>,
        Vec<ExportProgress>,
    ) {
        let (progress, seen) = recorder();
        let log = Arc::clone(&self.log);
        let driver = PipelineDriver::new(
            self.source,
            self.compositor,
            self.sink,
            self.muxer,
            self.audio,
            overlay(),
            options,
            progress,
        );
        let result = driver.execute();
        let lines = log.lock().clone();
        let progress = seen.lock().clone();
        (result, lines, progress)
    }
}

fn position(lines: &[String], needle: &str) -> usize {
    lines
        .iter()
        .position(|l| l == needle)
        .unwrap_or_else(|| panic!("missing log line {needle:?} in {lines:#?}"))
}

fn tail(lines: &[String], n: usize) -> Vec<&str> {
    lines[lines.len() - n..].iter().map(String::as_str).collect()
}

#[test]
fn video_only_export_completes() {
    let (result, lines, progress) = Harness::new(|log| FakeSource::frames(log, 3)).run(options());
    let summary = result.unwrap();

    assert_eq!(summary.frames_rendered, 3);
    assert_eq!(summary.video_samples, 3);
    assert_eq!(summary.audio_samples, 0);
    assert_eq!(summary.frame_wait_timeouts, 0);
    assert_eq!(summary.duration_micros, 120_000);

    assert!(position(&lines, "upload 64x36") < position(&lines, "composite 0"));
    assert!(position(&lines, "add video h264") < position(&lines, "start"));
    assert!(position(&lines, "start") < position(&lines, "write 0 0 16"));
    assert!(position(&lines, "end of input") < position(&lines, "finalize"));
    assert_eq!(
        tail(&lines, 5),
        vec![
            "finalize",
            "release muxer",
            "release compositor",
            "release sink",
            "release source"
        ]
    );

    let last = progress.last().unwrap();
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.stage, ExportStage::Complete);
    assert!((progress[0].progress - 0.05).abs() < 1e-9);
    for pair in progress.windows(2) {
        assert!(pair[1].progress >= pair[0].progress);
    }
}

#[test]
fn audio_track_bound_with_video_and_written_after_it() {
    let (result, lines, _) = Harness::new(|log| FakeSource::frames(log, 4))
        .with_audio(7)
        .run(options());
    let summary = result.unwrap();
    assert_eq!(summary.audio_samples, 7);
    assert_eq!(summary.video_samples, 4);

    let add_video = position(&lines, "add video h264");
    let add_audio = position(&lines, "add audio aac");
    let start = position(&lines, "start");
    assert!(add_video < add_audio && add_audio < start);
    assert_eq!(lines.iter().filter(|l| *l == "start").count(), 1);

    let last_video = lines
        .iter()
        .rposition(|l| l.starts_with("write 0 "))
        .unwrap();
    let first_audio = lines
        .iter()
        .position(|l| l.starts_with("write 1 "))
        .unwrap();
    assert!(last_video < first_audio);
    assert!(first_audio < position(&lines, "finalize"));
    assert_eq!(lines.iter().filter(|l| l.starts_with("write 1 ")).count(), 7);

    assert_eq!(
        tail(&lines, 5),
        vec![
            "release audio",
            "release muxer",
            "release compositor",
            "release sink",
            "release source"
        ]
    );
}

#[test]
fn codec_config_samples_are_not_muxed() {
    let mut harness = Harness::new(|log| FakeSource::frames(log, 2));
    harness.sink.config_sample = true;
    let (result, lines, _) = harness.run(options());
    let summary = result.unwrap();

    assert_eq!(summary.config_samples_skipped, 1);
    assert_eq!(summary.video_samples, 2);
    assert!(!lines.iter().any(|l| l.ends_with(" 5")));
}

#[test]
fn try_again_keeps_encoder_drained() {
    let steps = [
        Step::FormatChanged,
        Step::Frame(0),
        Step::TryAgain,
        Step::TryAgain,
        Step::Frame(40_000),
        Step::TryAgain,
    ];
    let (result, lines, _) = Harness::new(|log| FakeSource::new(log, &steps)).run(options());
    assert_eq!(result.unwrap().frames_rendered, 2);
    assert!(position(&lines, "write 0 0 16") < position(&lines, "composite 40000"));
}

#[test]
fn isolated_frame_wait_timeouts_are_tolerated() {
    let (result, _, progress) = Harness::new(|log| {
        let mut source = FakeSource::frames(log, 3);
        source.raise_signal = false;
        source
    })
    .run(options());

    let summary = result.unwrap();
    assert_eq!(summary.frames_rendered, 3);
    assert_eq!(summary.frame_wait_timeouts, 3);
    assert_eq!(progress.last().unwrap().progress, 1.0);
}

#[test]
fn consecutive_frame_wait_timeouts_fail_the_export() {
    let mut opts = options();
    opts.max_consecutive_frame_timeouts = 2;
    let (result, lines, progress) = Harness::new(|log| {
        let mut source = FakeSource::frames(log, 6);
        source.raise_signal = false;
        source
    })
    .run(opts);

    assert!(matches!(result, Err(VeneerError::DecodeError { .. })));
    assert!(!lines.iter().any(|l| l == "finalize"));
    assert_eq!(lines.iter().filter(|l| l.starts_with("composite")).count(), 2);
    assert_eq!(
        tail(&lines, 4),
        vec![
            "release muxer",
            "release compositor",
            "release sink",
            "release source"
        ]
    );
    assert!(progress.iter().all(|p| p.stage != ExportStage::Complete));
    assert!(progress.last().unwrap().progress < 1.0);
}

#[test]
fn unlimited_frame_wait_timeouts_when_limit_is_zero() {
    let mut opts = options();
    opts.frame_wait_timeout = Duration::from_millis(1);
    opts.max_consecutive_frame_timeouts = 0;
    let (result, _, _) = Harness::new(|log| {
        let mut source = FakeSource::frames(log, 8);
        source.raise_signal = false;
        source
    })
    .run(opts);
    assert_eq!(result.unwrap().frame_wait_timeouts, 8);
}

#[test]
fn zero_frame_source_fails() {
    let (result, lines, _) = Harness::new(|log| FakeSource::new(log, &[])).run(options());
    match result {
        Err(VeneerError::EncodeError { message }) => assert!(message.contains("no frames")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(lines.iter().any(|l| l == "add video h264"));
    assert!(!lines.iter().any(|l| l == "finalize"));
}

#[test]
fn stalled_encoder_drain_fails() {
    let mut harness = Harness::new(|log| FakeSource::frames(log, 2));
    harness.sink.never_finish = true;
    let (result, lines, _) = harness.run(options());
    assert!(matches!(result, Err(VeneerError::EncodeError { .. })));
    assert_eq!(tail(&lines, 1), vec!["release source"]);
}

#[test]
fn stalled_decoder_after_input_fails() {
    let (result, _, _) = Harness::new(|log| {
        let mut source = FakeSource::frames(log, 1);
        source.exhausted = || FrameResult::TryAgain;
        source
    })
    .run(options());
    assert!(matches!(result, Err(VeneerError::DecodeError { .. })));
}

#[test]
fn compositor_failure_releases_everything() {
    let mut harness = Harness::new(|log| FakeSource::frames(log, 5)).with_audio(3);
    harness.compositor.fail_at = Some(2);
    let (result, lines, progress) = harness.run(options());

    assert!(matches!(
        result,
        Err(VeneerError::CompositorInitFailed { .. })
    ));
    assert!(!lines.iter().any(|l| l.starts_with("write 1 ")));
    assert_eq!(
        tail(&lines, 5),
        vec![
            "release audio",
            "release muxer",
            "release compositor",
            "release sink",
            "release source"
        ]
    );
    let rendered = progress.last().unwrap().frames_rendered;
    assert_eq!(rendered, 2);
}

#[test]
fn mux_write_failure_is_terminal() {
    let mut harness = Harness::new(|log| FakeSource::frames(log, 3));
    harness.muxer.fail_writes = true;
    let (result, lines, _) = harness.run(options());
    assert!(matches!(result, Err(VeneerError::MuxWriteError { .. })));
    assert_eq!(lines.iter().filter(|l| l.starts_with("composite")).count(), 1);
}

#[test]
fn mid_stream_format_change_is_rejected() {
    let mut harness = Harness::new(|log| FakeSource::frames(log, 3));
    harness.sink.extra_format_change = true;
    let (result, _, _) = harness.run(options());
    assert!(matches!(result, Err(VeneerError::EncodeError { .. })));
}

#[test]
fn state_reflects_outcome() {
    let harness = Harness::new(|log| FakeSource::frames(log, 2));
    let (progress, _) = recorder();
    let mut driver = PipelineDriver::new(
        harness.source,
        harness.compositor,
        harness.sink,
        harness.muxer,
        None::<FakeAudio>,
        overlay(),
        options(),
        progress,
    );
    assert_eq!(driver.state(), PipelineState::Configuring);
    driver.run().unwrap();
    assert_eq!(driver.state(), PipelineState::Complete);
    assert_eq!(driver.summary().frames_rendered, 2);
    driver.release();

    let harness = Harness::new(|log| FakeSource::new(log, &[]));
    let (progress, _) = recorder();
    let mut driver = PipelineDriver::new(
        harness.source,
        harness.compositor,
        harness.sink,
        harness.muxer,
        None::<FakeAudio>,
        overlay(),
        options(),
        progress,
    );
    assert!(driver.run().is_err());
    assert_eq!(driver.state(), PipelineState::Failed);
}
