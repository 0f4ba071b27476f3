//! Export a video with an overlay.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use veneer_common::{BackendPreference, ExportDefaults};
use veneer_media_model::OverlayImage;
use veneer_render_engine::export::{export_with_outcome, ExportJob, ExportOutcome, ExportProgress};

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Source video
    pub video: PathBuf,

    /// PNG overlay; transparent pixels let the video show through
    #[arg(long)]
    pub overlay: PathBuf,

    /// Output file path [default: <video>-overlay.<ext> next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Render backend: auto, gpu, or ffmpeg-cli
    #[arg(long)]
    pub backend: Option<BackendPreference>,

    /// Encoder to try, in order; repeat to list several
    #[arg(long = "encoder")]
    pub encoders: Vec<String>,

    /// Upper bound on the video bitrate (bits/s)
    #[arg(long)]
    pub max_bitrate: Option<u64>,

    /// Seconds between key frames
    #[arg(long)]
    pub key_frame_interval: Option<u32>,

    /// Try hardware decoding
    #[arg(long)]
    pub hardware_decode: bool,

    /// Milliseconds to wait for each decoded frame to reach the GPU
    #[arg(long)]
    pub frame_wait_timeout_ms: Option<u64>,

    /// Consecutive frame-wait timeouts tolerated (0 = unlimited)
    #[arg(long)]
    pub max_frame_timeouts: Option<u32>,

    /// Write an export summary as JSON next to the output
    #[arg(long)]
    pub report: bool,
}

impl ExportArgs {
    /// Layer command-line overrides over the configured defaults.
    fn apply_overrides(&self, mut defaults: ExportDefaults) -> ExportDefaults {
        if let Some(backend) = self.backend {
            defaults.backend = backend;
        }
        if !self.encoders.is_empty() {
            defaults.encoders = self.encoders.clone();
        }
        if let Some(max_bitrate) = self.max_bitrate {
            defaults.max_bitrate = max_bitrate;
        }
        if let Some(secs) = self.key_frame_interval {
            defaults.key_frame_interval_secs = secs;
        }
        if self.hardware_decode {
            defaults.hardware_decode = true;
        }
        if let Some(ms) = self.frame_wait_timeout_ms {
            defaults.frame_wait_timeout_ms = ms;
        }
        if let Some(limit) = self.max_frame_timeouts {
            defaults.max_consecutive_frame_timeouts = limit;
        }
        defaults
    }

    fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output_path(&self.video))
    }
}

/// Contents of the `--report` file.
#[derive(Debug, Serialize)]
struct ExportReport<'a> {
    generated_at: DateTime<Utc>,
    input: &'a Path,
    overlay: &'a Path,
    #[serde(flatten)]
    outcome: &'a ExportOutcome,
}

fn default_output_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = video
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    video.with_file_name(format!("{stem}-overlay.{ext}"))
}

pub async fn run(args: ExportArgs, defaults: ExportDefaults) -> anyhow::Result<()> {
    let settings = args.apply_overrides(defaults);
    let output_path = args.output_path();

    let overlay = OverlayImage::load_png(&args.overlay)
        .map_err(|e| anyhow::anyhow!("Failed to load overlay {}: {e}", args.overlay.display()))?;

    println!("Exporting: {}", args.video.display());
    println!("  Overlay: {} ({}x{})", args.overlay.display(), overlay.width(), overlay.height());
    println!("  Output: {}", output_path.display());
    println!("  Backend: {:?}", settings.backend);

    let job = ExportJob::new(&args.video, overlay, &output_path).with_settings(settings);

    let progress_cb: Box<dyn Fn(ExportProgress) + Send> = Box::new(|p| {
        print!(
            "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
            p.progress * 100.0,
            p.frames_rendered,
            p.total_frames,
            p.eta_secs,
        );
        let _ = std::io::stdout().flush();
    });

    let result =
        tokio::task::spawn_blocking(move || export_with_outcome(job, Some(progress_cb))).await?;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            println!();
            return Err(anyhow::anyhow!("Export failed: {e}"));
        }
    };

    println!("\nExport complete: {}", outcome.output_path.display());
    println!(
        "  {} frames, {:.2}s, {} audio samples ({} backend)",
        outcome.summary.frames_rendered,
        outcome.summary.duration_micros as f64 / 1_000_000.0,
        outcome.summary.audio_samples,
        outcome.backend
    );
    if outcome.summary.frame_wait_timeouts > 0 {
        println!(
            "  [WARN] {} frames were composited after a GPU wait timeout",
            outcome.summary.frame_wait_timeouts
        );
    }

    if args.report {
        let report_path = outcome.output_path.with_extension("report.json");
        let report = ExportReport {
            generated_at: Utc::now(),
            input: &args.video,
            overlay: &args.overlay,
            outcome: &outcome,
        };
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
        tracing::info!(report = %report_path.display(), "Wrote export report");
        println!("  Report: {}", report_path.display());
    }
    Ok(())
}
