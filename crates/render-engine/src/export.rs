//! Export jobs and the public entry points.

use std::path::{Path, PathBuf};

use serde::Serialize;
use veneer_common::{ExportDefaults, VeneerError, VeneerResult};
use veneer_media_model::OverlayImage;

use crate::backend::select_backend;
use crate::driver::PipelineSummary;

/// An export job ready to be rendered.
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Source video.
    pub video_path: PathBuf,

    /// Straight-alpha RGBA image blended over every frame. Any size; it is
    /// cover-cropped to the output geometry.
    pub overlay: OverlayImage,

    /// Output file path. Its extension picks the container.
    pub output_path: PathBuf,

    /// Export configuration.
    pub settings: ExportDefaults,
}

impl ExportJob {
    pub fn new(
        video_path: impl Into<PathBuf>,
        overlay: OverlayImage,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            video_path: video_path.into(),
            overlay,
            output_path: output_path.into(),
            settings: ExportDefaults::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExportDefaults) -> Self {
        self.settings = settings;
        self
    }
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Export progress report.
#[derive(Debug, Clone, Serialize)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0]. Never decreases within one export.
    pub progress: f64,

    /// Frames rendered so far.
    pub frames_rendered: u64,

    /// Estimated total frames.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: ExportStage,
}

/// Stages of the export process. A failed export simply stops reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Rendering,
    Encoding,
    Finalizing,
    Complete,
}

/// Trait for render backends.
pub trait RenderBackend: Send {
    /// Execute the export job, writing `job.output_path`.
    fn render(
        &mut self,
        job: &ExportJob,
        progress: Option<ProgressCallback>,
    ) -> VeneerResult<PipelineSummary>;

    /// Check if this backend can run on this system.
    fn is_available(&self) -> bool;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Result of a successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub output_path: PathBuf,
    pub backend: String,
    pub summary: PipelineSummary,
}

/// Composite `job.overlay` over `job.video_path` and write the result to
/// `job.output_path`.
///
/// On failure nothing is left at the output path.
pub fn export_video_with_overlay(
    job: ExportJob,
    progress: Option<ProgressCallback>,
) -> VeneerResult<PathBuf> {
    export_with_outcome(job, progress).map(|outcome| outcome.output_path)
}

/// Like [`export_video_with_overlay`], returning the backend's summary too.
pub fn export_with_outcome(
    job: ExportJob,
    progress: Option<ProgressCallback>,
) -> VeneerResult<ExportOutcome> {
    tracing::info!(
        input = %job.video_path.display(),
        output = %job.output_path.display(),
        overlay = ?job.overlay,
        backend = ?job.settings.backend,
        "Starting export"
    );
    validate_job(&job)?;

    let mut backend = select_backend(job.settings.backend)?;
    let guard = OutputGuard::prepare(&job.output_path)?;
    let started = std::time::Instant::now();

    let summary = match backend.render(&job, progress) {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!(
                backend = backend.name(),
                stage = err.stage().as_str(),
                error = %err,
                "Export failed"
            );
            return Err(err);
        }
    };
    guard.disarm();

    tracing::info!(
        backend = backend.name(),
        frames = summary.frames_rendered,
        audio_samples = summary.audio_samples,
        elapsed_secs = started.elapsed().as_secs_f64(),
        output = %job.output_path.display(),
        "Export finished"
    );
    Ok(ExportOutcome {
        output_path: job.output_path,
        backend: backend.name().to_string(),
        summary,
    })
}

/// Run [`export_video_with_overlay`] on Tokio's blocking pool.
pub async fn export_video_with_overlay_async(
    job: ExportJob,
    progress: Option<ProgressCallback>,
) -> VeneerResult<PathBuf> {
    tokio::task::spawn_blocking(move || export_video_with_overlay(job, progress))
        .await
        .map_err(|e| VeneerError::Other(anyhow::anyhow!("export task failed: {e}")))?
}

fn validate_job(job: &ExportJob) -> VeneerResult<()> {
    job.settings.validate()?;
    if !job.video_path.is_file() {
        return Err(VeneerError::InputNotFound {
            path: job.video_path.clone(),
        });
    }
    let (width, height) = (job.overlay.width(), job.overlay.height());
    if width == 0 || height == 0 || job.overlay.pixels().len() != width as usize * height as usize * 4 {
        return Err(VeneerError::overlay(format!(
            "overlay buffer does not match {width}x{height} RGBA"
        )));
    }
    if same_file(&job.video_path, &job.output_path) {
        return Err(VeneerError::config("output path must differ from the input video"));
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Owns the output path for the duration of an export and removes whatever
/// is there on drop unless disarmed.
struct OutputGuard {
    path: PathBuf,
    armed: bool,
}

impl OutputGuard {
    /// Clear any previous file at `path` and create its parent directory.
    fn prepare(path: &Path) -> VeneerResult<Self> {
        if path.is_dir() {
            return Err(VeneerError::config(format!(
                "output path {} is a directory",
                path.display()
            )));
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed previous output"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            armed: true,
        })
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial output"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Failed to remove partial output")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay() -> OverlayImage {
        OverlayImage::transparent(4, 4).unwrap()
    }

    #[test]
    fn test_guard_removes_output_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("out.mp4");
        {
            let _guard = OutputGuard::prepare(&output).unwrap();
            assert!(output.parent().unwrap().is_dir());
            std::fs::write(&output, b"partial").unwrap();
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_disarmed_guard_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let guard = OutputGuard::prepare(&output).unwrap();
        std::fs::write(&output, b"done").unwrap();
        guard.disarm();
        assert_eq!(std::fs::read(&output).unwrap(), b"done");
    }

    #[test]
    fn test_guard_clears_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        std::fs::write(&output, b"stale").unwrap();
        let guard = OutputGuard::prepare(&output).unwrap();
        assert!(!output.exists());
        guard.disarm();
    }

    #[test]
    fn test_guard_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            OutputGuard::prepare(dir.path()),
            Err(VeneerError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let job = ExportJob::new(dir.path().join("missing.mp4"), overlay(), dir.path().join("out.mp4"));
        let err = export_video_with_overlay(job, None).unwrap_err();
        assert!(matches!(err, VeneerError::InputNotFound { .. }));
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[test]
    fn test_output_must_differ_from_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"not really a video").unwrap();
        let job = ExportJob::new(&input, overlay(), &input);
        assert!(matches!(validate_job(&job), Err(VeneerError::Config { .. })));
        assert!(input.exists());
    }

    #[test]
    fn test_invalid_settings_are_rejected_before_touching_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");
        std::fs::write(&input, b"x").unwrap();
        std::fs::write(&output, b"keep me").unwrap();

        let mut settings = ExportDefaults::default();
        settings.encoders.clear();
        let job = ExportJob::new(&input, overlay(), &output).with_settings(settings);
        assert!(matches!(
            export_video_with_overlay(job, None),
            Err(VeneerError::Config { .. })
        ));
        assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExportStage::Finalizing).unwrap(),
            "\"finalizing\""
        );
    }
}
