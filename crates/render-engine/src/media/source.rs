use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{codec, decoder, format, frame, media, Packet, Rational};
use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::MediaDescriptor;

use super::hw::{self, HwDevice};
use super::probe::{open_input, read_descriptor, to_micros};
use super::is_again;
use crate::gpu::{GpuContext, VideoSurface};
use crate::signal::FrameSignal;
use crate::stage::{FrameResult, FrameSource};

/// Upper bound on packets sent to the decoder per `pump_input` call.
const MAX_PACKETS_PER_PUMP: usize = 16;

struct Scaler {
    context: scaling::Context,
    input: (Pixel, u32, u32),
    output: frame::Video,
}

/// Demuxer and video decoder publishing RGBA frames into a [`VideoSurface`].
pub struct FfmpegFrameSource {
    decoder: decoder::Video,
    _hw_device: Option<HwDevice>,
    input: format::context::Input,
    stream_index: usize,
    time_base: Rational,
    descriptor: MediaDescriptor,
    surface: Arc<VideoSurface>,
    scaler: Option<Scaler>,
    /// Decoded frame held back while its format change is reported.
    held: Option<frame::Video>,
    /// Packet the decoder refused with EAGAIN.
    pending_packet: Option<Packet>,
    eof_sent: bool,
    frames: u64,
}

impl FfmpegFrameSource {
    /// Open `path` and allocate the video surface at the coded frame size.
    /// With `hardware_decode`, a device context is attached when one can be
    /// created; otherwise decoding is done in software.
    pub fn open(path: &Path, hardware_decode: bool, gpu: &Arc<GpuContext>) -> VeneerResult<Self> {
        super::init()?;
        let input = open_input(path)?;

        let (stream_index, time_base, descriptor, mut context) = {
            let stream = input.streams().best(media::Type::Video).ok_or_else(|| {
                VeneerError::no_video_track(format!("{} has no video track", path.display()))
            })?;
            let descriptor = read_descriptor(&input, &stream)?;
            let context = codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| VeneerError::decode_init(format!("bad video parameters: {e}")))?;
            (stream.index(), stream.time_base(), descriptor, context)
        };

        let hw_device = if hardware_decode {
            match HwDevice::open_preferred() {
                Some(device) => {
                    // SAFETY: the context is not open yet and takes ownership
                    // of the new reference.
                    unsafe { (*context.as_mut_ptr()).hw_device_ctx = device.new_ref() };
                    tracing::info!(device = ?device.kind(), "Hardware decoding enabled");
                    Some(device)
                }
                None => {
                    tracing::warn!("No hardware decode device; using software decoding");
                    None
                }
            }
        } else {
            None
        };

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| VeneerError::decode_init(format!("failed to open video decoder: {e}")))?;

        let surface = Arc::new(VideoSurface::new(gpu, descriptor.width, descriptor.height));
        tracing::info!(
            path = %path.display(),
            width = descriptor.width,
            height = descriptor.height,
            rotation = descriptor.rotation.degrees(),
            fps = descriptor.frame_rate,
            duration_us = descriptor.duration_micros,
            codec = %descriptor.mime_type,
            "Opened video source"
        );

        Ok(Self {
            decoder,
            _hw_device: hw_device,
            input,
            stream_index,
            time_base,
            descriptor,
            surface,
            scaler: None,
            held: None,
            pending_packet: None,
            eof_sent: false,
            frames: 0,
        })
    }

    /// The surface decoded frames land in; shared with the compositor.
    pub fn surface(&self) -> Arc<VideoSurface> {
        Arc::clone(&self.surface)
    }

    fn send_eof(&mut self) -> VeneerResult<()> {
        if !self.eof_sent {
            self.decoder
                .send_eof()
                .map_err(|e| VeneerError::decode(format!("failed to flush decoder: {e}")))?;
            self.eof_sent = true;
            tracing::debug!("Decoder input exhausted");
        }
        Ok(())
    }

    fn needs_scaler(&self, frame: &frame::Video) -> bool {
        let format = (frame.format(), frame.width(), frame.height());
        self.scaler.as_ref().map(|s| s.input) != Some(format)
    }

    fn rebuild_scaler(&mut self, frame: &frame::Video) -> VeneerResult<()> {
        let (width, height) = (self.surface.width(), self.surface.height());
        let context = scaling::Context::get(
            frame.format(),
            frame.width(),
            frame.height(),
            Pixel::RGBA,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| {
            VeneerError::decode(format!(
                "cannot convert {:?} frames to RGBA: {e}",
                frame.format()
            ))
        })?;
        tracing::debug!(
            format = ?frame.format(),
            width = frame.width(),
            height = frame.height(),
            "Decoder output format changed"
        );
        self.scaler = Some(Scaler {
            context,
            input: (frame.format(), frame.width(), frame.height()),
            output: frame::Video::new(Pixel::RGBA, width, height),
        });
        Ok(())
    }

    fn publish(&mut self, frame: frame::Video) -> VeneerResult<FrameResult> {
        let pts_micros = frame
            .timestamp()
            .or_else(|| frame.pts())
            .map(|ts| to_micros(ts, self.time_base))
            .unwrap_or_else(|| self.frames as i64 * self.descriptor.frame_interval_micros());

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| VeneerError::decode("frame decoded before its format was known"))?;
        scaler
            .context
            .run(&frame, &mut scaler.output)
            .map_err(|e| VeneerError::decode(format!("pixel conversion failed: {e}")))?;

        let token = self.surface.publish(
            scaler.output.data(0),
            scaler.output.stride(0),
            pts_micros,
        )?;
        self.frames += 1;
        Ok(FrameResult::Frame(token))
    }
}

impl FrameSource for FfmpegFrameSource {
    fn descriptor(&self) -> &MediaDescriptor {
        &self.descriptor
    }

    fn frame_signal(&self) -> Arc<FrameSignal> {
        self.surface.signal()
    }

    fn pump_input(&mut self) -> VeneerResult<bool> {
        if self.eof_sent {
            return Ok(false);
        }

        let mut sent = 0;
        while sent < MAX_PACKETS_PER_PUMP {
            let packet = match self.pending_packet.take() {
                Some(packet) => packet,
                None => {
                    let mut packet = Packet::empty();
                    match packet.read(&mut self.input) {
                        Ok(()) => {}
                        Err(ffmpeg_next::Error::Eof) => {
                            self.send_eof()?;
                            return Ok(false);
                        }
                        Err(err) if is_again(&err) => break,
                        Err(err) => {
                            return Err(VeneerError::decode(format!("demuxing failed: {err}")));
                        }
                    }
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    packet
                }
            };

            match self.decoder.send_packet(&packet) {
                Ok(()) => sent += 1,
                Err(err) if is_again(&err) => {
                    self.pending_packet = Some(packet);
                    break;
                }
                Err(err) => {
                    return Err(VeneerError::decode(format!(
                        "decoder rejected packet: {err}"
                    )));
                }
            }
        }
        Ok(true)
    }

    /// Decoding is synchronous, so `_timeout` never needs to be spent.
    fn dequeue_frame(&mut self, _timeout: Duration) -> VeneerResult<FrameResult> {
        if let Some(frame) = self.held.take() {
            return self.publish(frame);
        }

        let mut decoded = frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => return Ok(FrameResult::EndOfStream),
            Err(err) if is_again(&err) => return Ok(FrameResult::TryAgain),
            Err(err) => return Err(VeneerError::decode(format!("decoding failed: {err}"))),
        }

        let decoded = if hw::is_hw_frame(&decoded) {
            hw::transfer_hw_frame(&decoded).map_err(|e| {
                VeneerError::decode(format!("failed to download hardware frame: {e}"))
            })?
        } else {
            decoded
        };

        if self.needs_scaler(&decoded) {
            self.rebuild_scaler(&decoded)?;
            self.held = Some(decoded);
            return Ok(FrameResult::FormatChanged);
        }
        self.publish(decoded)
    }
}
