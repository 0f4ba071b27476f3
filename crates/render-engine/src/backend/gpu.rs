use std::sync::Arc;

use veneer_common::VeneerResult;
use veneer_media_model::EncoderSettings;

use crate::compositor::GpuCompositor;
use crate::driver::{DriverOptions, PipelineDriver, PipelineSummary};
use crate::export::{ExportJob, ProgressCallback, RenderBackend};
use crate::gpu::GpuContext;
use crate::media::{self, FfmpegAudioTrack, FfmpegFrameSink, FfmpegFrameSource, FfmpegMuxer};
use crate::progress::ProgressReporter;
use crate::stage::FrameSource;

/// Decode, composite on the GPU, encode and mux in-process.
#[derive(Debug, Default)]
pub struct GpuBackend;

impl GpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RenderBackend for GpuBackend {
    fn render(
        &mut self,
        job: &ExportJob,
        progress: Option<ProgressCallback>,
    ) -> VeneerResult<PipelineSummary> {
        // Acquisition order is the reverse of the driver's release order;
        // on an early return the locals drop in reverse too.
        let gpu = GpuContext::new()?;
        let source =
            FfmpegFrameSource::open(&job.video_path, job.settings.hardware_decode, &gpu)?;
        let descriptor = source.descriptor().clone();
        let geometry = descriptor.output_geometry()?;

        let settings = EncoderSettings::new(geometry, descriptor.frame_rate, &job.settings);
        let global_header = FfmpegMuxer::container_requires_global_header(&job.output_path)?;
        let (sink, target) = FfmpegFrameSink::configure(&gpu, &settings, global_header)?;
        let compositor = GpuCompositor::new(
            Arc::clone(&gpu),
            &source.surface(),
            target,
            descriptor.rotation,
        )?;
        let muxer = FfmpegMuxer::create(&job.output_path)?;
        let audio = FfmpegAudioTrack::open(&job.video_path)?;

        tracing::info!(
            backend = self.name(),
            adapter = %gpu.adapter_info().name,
            encoder = sink.encoder_name(),
            output = %geometry,
            audio = audio.is_some(),
            "GPU pipeline assembled"
        );

        PipelineDriver::new(
            source,
            compositor,
            sink,
            muxer,
            audio,
            job.overlay.clone(),
            DriverOptions::from_defaults(&job.settings),
            ProgressReporter::new(progress),
        )
        .execute()
    }

    fn is_available(&self) -> bool {
        media::init().is_ok() && GpuContext::is_available()
    }

    fn name(&self) -> &str {
        "gpu"
    }
}
