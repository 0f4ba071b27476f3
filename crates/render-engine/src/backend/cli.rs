//! Fallback backend driving the `ffmpeg` executable.
//!
//! The overlay is cover-cropped on the CPU exactly as the GPU path does it
//! and handed to ffmpeg as a PNG already at the output size, so the filter
//! graph only scales the video and blends.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use serde::Deserialize;
use veneer_common::{secs_to_micros, VeneerError, VeneerResult};
use veneer_media_model::{EncoderSettings, MediaDescriptor, OutputGeometry, Rotation};

use crate::driver::PipelineSummary;
use crate::export::{ExportJob, ExportStage, ProgressCallback, RenderBackend};
use crate::progress::ProgressReporter;

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";
const FALLBACK_FRAME_RATE: f64 = 30.0;
const STALL_WARNING_SECS: u64 = 10;

#[derive(Debug, Default)]
pub struct FfmpegCliBackend;

impl FfmpegCliBackend {
    pub fn new() -> Self {
        Self
    }

    fn run_ffmpeg(
        &self,
        args: &[String],
        expected_duration_secs: f64,
        reporter: &mut ProgressReporter,
    ) -> VeneerResult<ProgressState> {
        tracing::debug!(?args, "Running ffmpeg");
        let start = Instant::now();
        let mut child = Command::new(FFMPEG)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VeneerError::encode_init(format!("failed to start ffmpeg: {e}")))?;

        tracing::info!(pid = child.id(), args_len = args.len(), "ffmpeg process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VeneerError::encode_init("failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VeneerError::encode_init("failed to capture ffmpeg stderr"))?;

        // ffmpeg blocks once its stderr pipe fills up.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut output = String::new();
            match BufReader::new(stderr).read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let mut state = ProgressState::default();
        let mut last_progress_secs = 0.0f64;
        let mut last_progress_wall = Instant::now();
        loop {
            line.clear();
            let bytes = reader
                .read_line(&mut line)
                .map_err(|e| VeneerError::encode(format!("failed reading ffmpeg progress: {e}")))?;
            if bytes == 0 {
                break;
            }

            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            state.update(key, value);
            if key != "progress" {
                continue;
            }

            if state.out_time_secs > last_progress_secs + 0.001 {
                last_progress_secs = state.out_time_secs;
                last_progress_wall = Instant::now();
            }
            if state.complete {
                reporter.stage(ExportStage::Finalizing, state.frame);
            } else {
                reporter.fraction(
                    state.fraction_of(expected_duration_secs),
                    ExportStage::Rendering,
                    state.frame,
                );
            }
            if last_progress_wall.elapsed().as_secs() >= STALL_WARNING_SECS {
                tracing::warn!(
                    out_time_secs = state.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No ffmpeg progress advancement for {STALL_WARNING_SECS}s"
                );
                last_progress_wall = Instant::now();
            }
        }

        let status = child
            .wait()
            .map_err(|e| VeneerError::encode(format!("failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(VeneerError::encode(format!(
                "ffmpeg export failed ({status}): {}",
                stderr_output.trim()
            )));
        }
        tracing::info!(
            frames = state.frame,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "ffmpeg process finished"
        );
        Ok(state)
    }
}

impl RenderBackend for FfmpegCliBackend {
    fn render(
        &mut self,
        job: &ExportJob,
        progress: Option<ProgressCallback>,
    ) -> VeneerResult<PipelineSummary> {
        let mut reporter = ProgressReporter::new(progress);

        let descriptor = probe_descriptor(&job.video_path)?;
        let geometry = descriptor.output_geometry()?;
        let settings = EncoderSettings::new(geometry, descriptor.frame_rate, &job.settings);
        let encoder = pick_encoder(&settings.encoders, &list_encoders()?)?;

        let overlay_file = tempfile::Builder::new()
            .prefix("veneer-overlay-")
            .suffix(".png")
            .tempfile()?;
        job.overlay.cover_to(geometry)?.save_png(overlay_file.path())?;

        let args = build_args(
            &job.video_path,
            overlay_file.path(),
            &job.output_path,
            &settings,
            &encoder,
        );
        tracing::info!(
            backend = self.name(),
            encoder = %encoder,
            output = %geometry,
            rotation = descriptor.rotation.degrees(),
            "Prepared ffmpeg export"
        );

        reporter.set_total_frames(descriptor.estimated_frames());
        reporter.setup_complete();
        let expected_secs = descriptor.duration_micros as f64 / 1_000_000.0;
        let state = self.run_ffmpeg(&args, expected_secs, &mut reporter)?;
        reporter.complete(state.frame);

        Ok(PipelineSummary {
            frames_rendered: state.frame,
            video_samples: state.frame,
            duration_micros: secs_to_micros(state.out_time_secs),
            ..PipelineSummary::default()
        })
    }

    fn is_available(&self) -> bool {
        command_exists(FFMPEG) && command_exists(FFPROBE)
    }

    fn name(&self) -> &str {
        "ffmpeg-cli"
    }
}

pub(crate) fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// First line of `ffmpeg -version`, when the executable runs.
pub fn ffmpeg_cli_version() -> Option<String> {
    let output = Command::new(FFMPEG).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()?
        .lines()
        .next()
        .map(|line| line.trim().to_string())
}

fn list_encoders() -> VeneerResult<String> {
    let output = Command::new(FFMPEG)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| VeneerError::encode_init(format!("failed to query ffmpeg encoders: {e}")))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// First of `candidates` listed by `ffmpeg -encoders`.
fn pick_encoder(candidates: &[String], listing: &str) -> VeneerResult<String> {
    let available: Vec<&str> = listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            flags.starts_with('V').then_some(name)
        })
        .collect();

    candidates
        .iter()
        .find(|name| available.contains(&name.as_str()))
        .cloned()
        .ok_or_else(|| {
            VeneerError::encode_init(format!(
                "ffmpeg provides none of the configured encoders: {}",
                candidates.join(", ")
            ))
        })
}

fn build_args(
    video: &Path,
    overlay_png: &Path,
    output: &Path,
    settings: &EncoderSettings,
    encoder: &str,
) -> Vec<String> {
    let OutputGeometry { width, height } = settings.geometry;
    let filter = format!(
        "[0:v]scale={width}:{height},setsar=1[base];\
         [base][1:v]overlay=0:0:format=auto,format=yuv420p[out]"
    );
    let bitrate = settings.bitrate.to_string();

    let mut args: Vec<String> = [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(["-i".to_string(), video.display().to_string()]);
    args.extend(["-i".to_string(), overlay_png.display().to_string()]);
    args.extend([
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[out]".to_string(),
        // At most one audio track, and none when the input has no audio.
        "-map".to_string(),
        "0:a:0?".to_string(),
        "-c:v".to_string(),
        encoder.to_string(),
        "-b:v".to_string(),
        bitrate.clone(),
        "-maxrate".to_string(),
        bitrate,
        "-g".to_string(),
        settings.gop_size().to_string(),
        "-bf".to_string(),
        "0".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
    ]);
    if output.extension().is_none() {
        args.extend(["-f".to_string(), "mp4".to_string()]);
    }
    args.push(output.display().to_string());
    args
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    codec_name: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn probe_descriptor(path: &Path) -> VeneerResult<MediaDescriptor> {
    if !path.exists() {
        return Err(VeneerError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let output = Command::new(FFPROBE)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,codec_name,avg_frame_rate,r_frame_rate,duration:\
             stream_tags=rotate:stream_side_data=rotation:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| VeneerError::decode_init(format!("failed to run ffprobe: {e}")))?;
    if !output.status.success() {
        return Err(VeneerError::decode_init(format!(
            "ffprobe could not read {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let probe: ProbeOutput = serde_json::from_slice(&output.stdout)?;
    descriptor_from_probe(path, probe)
}

fn descriptor_from_probe(path: &Path, probe: ProbeOutput) -> VeneerResult<MediaDescriptor> {
    let container_duration = probe.format.and_then(|format| format.duration);
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| VeneerError::no_video_track(format!("{} has no video track", path.display())))?;

    // Side data carries a counter-clockwise angle; the tag is clockwise.
    let rotation = stream
        .side_data_list
        .iter()
        .find_map(|side| side.rotation)
        .map(|ccw| Rotation::nearest(-ccw))
        .or_else(|| {
            stream
                .tags
                .get("rotate")
                .and_then(|tag| tag.trim().parse::<i64>().ok())
                .and_then(Rotation::from_degrees)
        })
        .unwrap_or_default();

    let frame_rate = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .filter_map(|rate| parse_rate(rate))
        .next()
        .unwrap_or(FALLBACK_FRAME_RATE);

    let duration_secs = [&stream.duration, &container_duration]
        .into_iter()
        .flatten()
        .filter_map(|d| d.parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let descriptor = MediaDescriptor {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        rotation,
        duration_micros: secs_to_micros(duration_secs),
        frame_rate,
        mime_type: format!("video/{}", stream.codec_name.as_deref().unwrap_or("unknown")),
    };
    descriptor.validate()?;
    Ok(descriptor)
}

/// Parse an ffprobe rate such as `30000/1001`; `0/0` and friends are `None`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den = den.parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num.parse::<f64>().ok()? / den
        }
        None => rate.parse::<f64>().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    frame: u64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite its name, ffmpeg reports `out_time_ms` in microseconds.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse::<u64>() {
                    self.frame = frame;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    fn fraction_of(&self, expected_duration_secs: f64) -> f64 {
        if expected_duration_secs <= 0.0 {
            0.0
        } else {
            (self.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
        }
    }
}
