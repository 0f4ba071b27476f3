use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{codec, encoder, frame, Dictionary, Packet, Rational};
use veneer_common::{MonotonicTimestamps, VeneerError, VeneerResult};
use veneer_media_model::{EncoderSettings, Sample, SampleFlags};

use super::muxer::StreamFormat;
use super::{is_again, MICROS};
use crate::gpu::{EncoderSurface, GpuContext, PresentedFrame};
use crate::stage::{DrainMode, FrameSink, SinkEvent};

/// Smallest frame edge any of the supported encoders accepts.
const MIN_DIMENSION: u32 = 16;

/// H.264 encoder fed from an [`EncoderSurface`].
///
/// Presented frames are read back as RGBA, converted to the encoder's pixel
/// format and stamped with strictly increasing microsecond timestamps.
pub struct FfmpegFrameSink {
    encoder: encoder::video::Encoder,
    name: String,
    surface: Arc<EncoderSurface>,
    scaler: scaling::Context,
    rgba: frame::Video,
    timestamps: MonotonicTimestamps,
    format: StreamFormat,
    format_reported: bool,
    end_requested: bool,
    eof_sent: bool,
    finished: bool,
    frames_in: u64,
    packets_out: u64,
}

impl FfmpegFrameSink {
    /// Open the first encoder in `settings.encoders` that this FFmpeg build
    /// provides. Returns the sink and the surface the compositor renders to.
    pub fn configure(
        gpu: &Arc<GpuContext>,
        settings: &EncoderSettings,
        global_header: bool,
    ) -> VeneerResult<(Self, Arc<EncoderSurface>)> {
        super::init()?;
        let geometry = settings.geometry;
        if geometry.width < MIN_DIMENSION || geometry.height < MIN_DIMENSION {
            return Err(VeneerError::encode_init(format!(
                "output {geometry} is below the {MIN_DIMENSION}px minimum"
            )));
        }

        let (name, codec) = settings
            .encoders
            .iter()
            .find_map(|name| encoder::find_by_name(name).map(|codec| (name.clone(), codec)))
            .ok_or_else(|| {
                VeneerError::encode_init(format!(
                    "none of the configured encoders are available: {}",
                    settings.encoders.join(", ")
                ))
            })?;

        let pixel = preferred_pixel_format(&codec);
        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| VeneerError::encode_init(format!("{name}: not a video encoder: {e}")))?;

        video.set_width(geometry.width);
        video.set_height(geometry.height);
        video.set_format(pixel);
        video.set_time_base(MICROS);
        video.set_frame_rate(Some(frame_rate(settings.frame_rate)));
        video.set_bit_rate(settings.bitrate as usize);
        video.set_max_bit_rate(settings.bitrate as usize);
        video.set_gop(settings.gop_size());
        video.set_max_b_frames(0);
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = video.open_as_with(codec, Dictionary::new()).map_err(|e| {
            VeneerError::encode_init(format!("failed to open {name} at {geometry}: {e}"))
        })?;

        let mut parameters = codec::Parameters::new();
        // SAFETY: both pointers are live; the encoder is open so its
        // extradata is final.
        let ret = unsafe {
            ffmpeg_next::ffi::avcodec_parameters_from_context(
                parameters.as_mut_ptr(),
                encoder.as_ptr(),
            )
        };
        if ret < 0 {
            return Err(VeneerError::encode_init(format!(
                "failed to export {name} parameters: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }

        let scaler = scaling::Context::get(
            Pixel::RGBA,
            geometry.width,
            geometry.height,
            pixel,
            geometry.width,
            geometry.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| VeneerError::encode_init(format!("cannot convert RGBA to {pixel:?}: {e}")))?;

        let surface = Arc::new(EncoderSurface::new(gpu, geometry));
        tracing::info!(
            encoder = %name,
            output = %geometry,
            pixel_format = ?pixel,
            bitrate = settings.bitrate,
            gop = settings.gop_size(),
            global_header,
            "Encoder configured"
        );

        let sink = Self {
            encoder,
            name,
            surface: Arc::clone(&surface),
            scaler,
            rgba: frame::Video::new(Pixel::RGBA, geometry.width, geometry.height),
            timestamps: MonotonicTimestamps::new(),
            format: StreamFormat {
                parameters,
                time_base: MICROS,
            },
            format_reported: false,
            end_requested: false,
            eof_sent: false,
            finished: false,
            frames_in: 0,
            packets_out: 0,
        };
        Ok((sink, surface))
    }

    /// Name of the encoder that was opened.
    pub fn encoder_name(&self) -> &str {
        &self.name
    }

    fn encode(
        &mut self,
        presented: PresentedFrame,
        events: &mut Vec<SinkEvent<StreamFormat>>,
    ) -> VeneerResult<()> {
        let geometry = self.surface.geometry();
        if (presented.width, presented.height) != (geometry.width, geometry.height) {
            return Err(VeneerError::encode(format!(
                "presented frame is {}x{}, encoder expects {geometry}",
                presented.width, presented.height
            )));
        }

        copy_rows(&presented.rgba, geometry.width as usize * 4, &mut self.rgba);
        let mut yuv = frame::Video::empty();
        self.scaler
            .run(&self.rgba, &mut yuv)
            .map_err(|e| VeneerError::encode(format!("pixel conversion failed: {e}")))?;
        yuv.set_pts(Some(self.timestamps.next(presented.pts_micros)));

        loop {
            match self.encoder.send_frame(&yuv) {
                Ok(()) => break,
                // The encoder is full; take its output and offer the frame again.
                Err(err) if is_again(&err) => {
                    if self.receive(events)? == 0 {
                        return Err(VeneerError::encode(format!(
                            "{} refused a frame and produced no output",
                            self.name
                        )));
                    }
                }
                Err(err) => {
                    return Err(VeneerError::encode(format!(
                        "{} rejected frame at {}us: {err}",
                        self.name, presented.pts_micros
                    )));
                }
            }
        }
        self.frames_in += 1;
        Ok(())
    }

    /// Collect everything the encoder has ready. Returns the number of
    /// events appended.
    fn receive(&mut self, events: &mut Vec<SinkEvent<StreamFormat>>) -> VeneerResult<usize> {
        let before = events.len();
        loop {
            let mut packet = Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    if let Some(sample) = self.to_sample(&packet) {
                        events.push(SinkEvent::AccessUnit(sample));
                        self.packets_out += 1;
                    }
                }
                Err(err) if is_again(&err) => break,
                Err(ffmpeg_next::Error::Eof) => {
                    self.finished = true;
                    events.push(SinkEvent::EndOfStream);
                    tracing::debug!(
                        encoder = %self.name,
                        frames = self.frames_in,
                        packets = self.packets_out,
                        "Encoder reached end of stream"
                    );
                    break;
                }
                Err(err) => {
                    return Err(VeneerError::encode(format!(
                        "{} failed to produce output: {err}",
                        self.name
                    )));
                }
            }
        }
        Ok(events.len() - before)
    }

    fn report_format(&mut self, events: &mut Vec<SinkEvent<StreamFormat>>) {
        if !self.format_reported {
            self.format_reported = true;
            events.push(SinkEvent::FormatChanged(self.format.clone()));
        }
    }

    fn to_sample(&self, packet: &Packet) -> Option<Sample> {
        let data = packet.data().filter(|data| !data.is_empty())?;
        let pts = packet.pts().or(packet.dts())?;
        let mut sample = Sample::new(data.to_vec(), pts).with_duration(packet.duration());
        if let Some(dts) = packet.dts() {
            sample = sample.with_dts(dts);
        }
        if packet.is_key() {
            sample = sample.with_flags(SampleFlags::KEY_FRAME);
        }
        Some(sample)
    }
}

impl FrameSink for FfmpegFrameSink {
    type Format = StreamFormat;

    fn signal_end_of_input(&mut self) -> VeneerResult<()> {
        if !self.end_requested {
            self.end_requested = true;
            tracing::debug!(frames = self.frames_in, "End of encoder input");
        }
        Ok(())
    }

    fn drain(&mut self, mode: DrainMode) -> VeneerResult<Vec<SinkEvent<StreamFormat>>> {
        let mut events = Vec::new();
        if self.finished {
            return Ok(events);
        }
        // Parameters are final once the encoder is open, so the first drain
        // reports them without waiting for encoder lookahead.
        self.report_format(&mut events);

        let mut timeout = match mode {
            DrainMode::NonBlocking => Duration::ZERO,
            DrainMode::Blocking(timeout) => timeout,
        };
        while let Some(presented) = self.surface.acquire(timeout)? {
            self.encode(presented, &mut events)?;
            timeout = Duration::ZERO;
        }

        if self.end_requested && !self.eof_sent && self.surface.pending() == 0 {
            self.encoder
                .send_eof()
                .map_err(|e| VeneerError::encode(format!("failed to flush {}: {e}", self.name)))?;
            self.eof_sent = true;
        }

        self.receive(&mut events)?;
        Ok(events)
    }
}

fn preferred_pixel_format(codec: &ffmpeg_next::Codec) -> Pixel {
    let supports_nv12 = codec
        .video()
        .ok()
        .and_then(|video| video.formats())
        .is_some_and(|mut formats| formats.any(|pixel| pixel == Pixel::NV12));
    if supports_nv12 {
        Pixel::NV12
    } else {
        Pixel::YUV420P
    }
}

/// Nominal frame rate as a rational, in thousandths for fractional rates.
fn frame_rate(fps: f64) -> Rational {
    if fps.fract().abs() < f64::EPSILON {
        Rational::new(fps as i32, 1)
    } else {
        Rational::new((fps * 1000.0).round() as i32, 1000)
    }
}

/// Copy tightly packed RGBA rows into `frame`, whose stride may be wider.
fn copy_rows(src: &[u8], row_bytes: usize, frame: &mut frame::Video) {
    let stride = frame.stride(0);
    let dst = frame.data_mut(0);
    for (src_row, dst_row) in src.chunks_exact(row_bytes).zip(dst.chunks_mut(stride)) {
        dst_row[..row_bytes].copy_from_slice(src_row);
    }
}
