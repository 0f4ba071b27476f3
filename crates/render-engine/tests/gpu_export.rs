//! End-to-end exports of small generated clips, checked by demuxing the
//! result.
//!
//! Fixtures are generated with the `ffmpeg` executable. Tests return early
//! when it is missing, when no GPU adapter exists, or when libx264 is not
//! linked.

#![cfg(feature = "ffmpeg")]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg::{media, Rational, Rescale};
use parking_lot::Mutex;
use veneer_common::{BackendPreference, ExportDefaults};
use veneer_media_model::OverlayImage;
use veneer_render_engine::gpu::GpuContext;
use veneer_render_engine::media::available_encoders;
use veneer_render_engine::{export_with_outcome, ExportJob, ExportOutcome, ExportStage};

const FPS: i64 = 30;
const FRAME_INTERVAL_MICROS: i64 = 1_000_000 / FPS;
const MICROS: Rational = Rational(1, 1_000_000);

fn ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

fn gpu_pipeline_ready() -> bool {
    if !ffmpeg_on_path() {
        eprintln!("ffmpeg executable not found; skipping");
        return false;
    }
    if !GpuContext::is_available() {
        eprintln!("no GPU adapter; skipping");
        return false;
    }
    if available_encoders(&["libx264".to_string()]).is_empty() {
        eprintln!("libx264 not linked; skipping");
        return false;
    }
    true
}

/// Two seconds of 320x240 test pattern at 30 fps, plus `audio_tracks` AAC
/// tone tracks.
fn make_fixture(dir: &Path, name: &str, audio_tracks: usize) -> PathBuf {
    let path = dir.join(name);
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"]);
    cmd.args(["-f", "lavfi", "-i", "testsrc=size=320x240:rate=30"]);
    for track in 0..audio_tracks {
        let tone = format!("sine=frequency={}:sample_rate=48000", 440 * (track + 1));
        cmd.args(["-f", "lavfi", "-i", &tone]);
    }
    cmd.args(["-map", "0:v"]);
    for track in 0..audio_tracks {
        cmd.args(["-map", &format!("{}:a", track + 1)]);
    }
    cmd.args(["-t", "2", "-c:v", "mpeg4", "-pix_fmt", "yuv420p"]);
    if audio_tracks > 0 {
        cmd.args(["-c:a", "aac"]);
    }
    cmd.arg(&path);

    let status = cmd.status().expect("run ffmpeg");
    assert!(status.success(), "fixture generation failed for {name}");
    path
}

#[derive(Debug)]
struct Track {
    kind: media::Type,
    time_base: Rational,
    packets: usize,
    start_micros: Option<i64>,
    end_micros: Option<i64>,
}

impl Track {
    fn span_micros(&self) -> i64 {
        match (self.start_micros, self.end_micros) {
            (Some(start), Some(end)) => end - start,
            _ => 0,
        }
    }
}

fn read_tracks(path: &Path) -> Vec<Track> {
    veneer_render_engine::media::init().unwrap();
    let mut input = ffmpeg::format::input(&path).unwrap();
    let mut tracks: Vec<Track> = input
        .streams()
        .map(|stream| Track {
            kind: stream.parameters().medium(),
            time_base: stream.time_base(),
            packets: 0,
            start_micros: None,
            end_micros: None,
        })
        .collect();

    for (stream, packet) in input.packets() {
        let track = &mut tracks[stream.index()];
        track.packets += 1;
        if let Some(pts) = packet.pts() {
            let start = pts.rescale(track.time_base, MICROS);
            let end = (pts + packet.duration().max(0)).rescale(track.time_base, MICROS);
            track.start_micros = Some(track.start_micros.map_or(start, |s| s.min(start)));
            track.end_micros = Some(track.end_micros.map_or(end, |e| e.max(end)));
        }
    }
    tracks
}

fn tracks_of(tracks: &[Track], kind: media::Type) -> Vec<&Track> {
    tracks.iter().filter(|track| track.kind == kind).collect()
}

fn overlay() -> OverlayImage {
    let (w, h) = (100u32, 100u32);
    let mut pixels = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for _ in 0..w {
            pixels.extend_from_slice(&[255, 255, 0, if y < h / 2 { 160 } else { 0 }]);
        }
    }
    OverlayImage::from_rgba(w, h, pixels).unwrap()
}

fn export(
    input: &Path,
    output: &Path,
    backend: BackendPreference,
) -> (ExportOutcome, Vec<(f64, ExportStage)>) {
    let settings = ExportDefaults {
        backend,
        encoders: vec!["libx264".to_string()],
        ..ExportDefaults::default()
    };
    let job = ExportJob::new(input, overlay(), output).with_settings(settings);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let outcome = export_with_outcome(
        job,
        Some(Box::new(move |p| sink.lock().push((p.progress, p.stage)))),
    )
    .unwrap();
    let progress = seen.lock().clone();
    (outcome, progress)
}

#[test]
fn video_only_export_matches_the_source_timeline() {
    if !gpu_pipeline_ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = make_fixture(dir.path(), "silent.mp4", 0);
    let output = dir.path().join("silent-overlay.mp4");

    let (outcome, progress) = export(&input, &output, BackendPreference::Gpu);
    assert_eq!(outcome.backend, "gpu");

    let source = read_tracks(&input);
    let source_video = tracks_of(&source, media::Type::Video)[0];
    let result = read_tracks(&output);
    assert_eq!(result.len(), 1, "no audio in, no audio out: {result:?}");
    let video = tracks_of(&result, media::Type::Video)[0];

    // ~duration x fps frames, one access unit per composited frame.
    assert!((video.packets as i64 - 2 * FPS).abs() <= 1, "{} packets", video.packets);
    assert_eq!(video.packets as u64, outcome.summary.frames_rendered);
    assert_eq!(video.packets, source_video.packets);

    let drift = (video.span_micros() - source_video.span_micros()).abs();
    assert!(drift <= FRAME_INTERVAL_MICROS + 1_000, "duration drifted by {drift}us");
    assert!((outcome.summary.duration_micros - 2_000_000).abs() <= FRAME_INTERVAL_MICROS + 1_000);

    assert!(progress.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert_eq!(progress.last().map(|p| (p.0, p.1)), Some((1.0, ExportStage::Complete)));
}

#[test]
fn audio_is_passed_through_sample_for_sample() {
    if !gpu_pipeline_ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = make_fixture(dir.path(), "tone.mp4", 1);
    let output = dir.path().join("tone-overlay.mp4");

    let (outcome, _) = export(&input, &output, BackendPreference::Gpu);

    let source = read_tracks(&input);
    let result = read_tracks(&output);
    assert_eq!(result.len(), 2, "{result:?}");

    let source_audio = tracks_of(&source, media::Type::Audio)[0];
    let audio = tracks_of(&result, media::Type::Audio);
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].packets, source_audio.packets);
    assert_eq!(outcome.summary.audio_samples, source_audio.packets as u64);

    let video = tracks_of(&result, media::Type::Video)[0];
    assert_eq!(video.packets as u64, outcome.summary.frames_rendered);
}

#[test]
fn second_audio_track_is_not_copied() {
    if !gpu_pipeline_ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = make_fixture(dir.path(), "dual.mp4", 2);
    let output = dir.path().join("dual-overlay.mp4");

    export(&input, &output, BackendPreference::Gpu);

    let result = read_tracks(&output);
    assert_eq!(tracks_of(&result, media::Type::Video).len(), 1);
    assert_eq!(tracks_of(&result, media::Type::Audio).len(), 1);
}

#[test]
fn cli_backend_copies_only_the_first_audio_track() {
    if !ffmpeg_on_path() {
        eprintln!("ffmpeg executable not found; skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = make_fixture(dir.path(), "dual.mp4", 2);
    let output = dir.path().join("dual-cli.mp4");

    let (outcome, _) = export(&input, &output, BackendPreference::FfmpegCli);
    assert_eq!(outcome.backend, "ffmpeg-cli");

    let result = read_tracks(&output);
    assert_eq!(result.len(), 2, "{result:?}");
    assert_eq!(tracks_of(&result, media::Type::Video).len(), 1);
    assert_eq!(tracks_of(&result, media::Type::Audio).len(), 1);
}
