use std::ffi::CString;
use std::path::{Path, PathBuf};

use ffmpeg_next::{codec, encoder, format, Packet, Rational};
use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::{Sample, TrackKind};

use super::MICROS;
use crate::stage::Muxer;

/// Container used when the output path has no recognised extension.
const DEFAULT_CONTAINER: &str = "mp4";

/// Track format handed from a producer to the muxer.
#[derive(Clone)]
pub struct StreamFormat {
    pub parameters: codec::Parameters,
    /// Time base the producer's timestamps were native to.
    pub time_base: Rational,
}

impl std::fmt::Debug for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFormat")
            .field("codec", &self.parameters.id())
            .field("time_base", &self.time_base)
            .finish()
    }
}

/// Container writer over an FFmpeg output context. Sample timestamps are
/// microseconds and are rescaled to each stream's time base on write.
pub struct FfmpegMuxer {
    output: format::context::Output,
    path: PathBuf,
    streams: Vec<(TrackKind, Rational)>,
    header_written: bool,
    trailer_written: bool,
}

impl FfmpegMuxer {
    pub fn create(path: &Path) -> VeneerResult<Self> {
        super::init()?;
        let output = if has_extension(path) {
            format::output(&path)
        } else {
            format::output_as(&path, DEFAULT_CONTAINER)
        }
        .map_err(|e| VeneerError::mux_init(format!("cannot create {}: {e}", path.display())))?;

        tracing::debug!(
            path = %path.display(),
            container = output.format().name(),
            "Muxer created"
        );
        Ok(Self {
            output,
            path: path.to_path_buf(),
            streams: Vec::new(),
            header_written: false,
            trailer_written: false,
        })
    }

    /// Whether the container [`FfmpegMuxer::create`] would pick for `path`
    /// needs codec extradata up front. Nothing is created on disk, so the
    /// encoder can be configured before the muxer exists.
    pub fn container_requires_global_header(path: &Path) -> VeneerResult<bool> {
        super::init()?;
        let filename = CString::new(path.to_string_lossy().into_owned())
            .map_err(|_| VeneerError::mux_init(format!("{} contains a NUL byte", path.display())))?;
        let short_name = if has_extension(path) {
            None
        } else {
            Some(CString::new(DEFAULT_CONTAINER).map_err(|e| VeneerError::mux_init(e.to_string()))?)
        };

        // SAFETY: the strings outlive the call; FFmpeg returns a pointer to a
        // static format description or null.
        let flags = unsafe {
            let format = ffmpeg_next::ffi::av_guess_format(
                short_name.as_ref().map_or(std::ptr::null(), |name| name.as_ptr()),
                filename.as_ptr(),
                std::ptr::null(),
            );
            if format.is_null() {
                return Err(VeneerError::mux_init(format!(
                    "no container matches {}",
                    path.display()
                )));
            }
            (*format).flags
        };
        Ok(flags as u32 & ffmpeg_next::ffi::AVFMT_GLOBALHEADER != 0)
    }

    /// Whether streams in this container need codec extradata up front.
    pub fn requires_global_header(&self) -> bool {
        self.output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER)
    }
}

fn has_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| !ext.is_empty())
}

impl Muxer for FfmpegMuxer {
    type Format = StreamFormat;

    fn add_track(&mut self, kind: TrackKind, format: &StreamFormat) -> VeneerResult<usize> {
        if self.header_written {
            return Err(VeneerError::mux_init("cannot add a track after start"));
        }
        let mut stream = self
            .output
            .add_stream(encoder::find(codec::Id::None))
            .map_err(|e| VeneerError::mux_init(format!("failed to add {kind} stream: {e}")))?;
        stream.set_parameters(format.parameters.clone());
        stream.set_time_base(format.time_base);
        // SAFETY: the stream's codecpar was just populated; a zero tag lets
        // the container pick its own.
        unsafe {
            (*stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        let index = stream.index();
        self.streams.push((kind, format.time_base));
        tracing::debug!(track = %kind, index, codec = ?format.parameters.id(), "Added stream");
        Ok(index)
    }

    fn start(&mut self) -> VeneerResult<()> {
        if self.header_written {
            return Err(VeneerError::mux_init("muxer started twice"));
        }
        self.output
            .write_header()
            .map_err(|e| VeneerError::mux_init(format!("failed to write header: {e}")))?;
        // The header may change stream time bases.
        for (index, (_, time_base)) in self.streams.iter_mut().enumerate() {
            if let Some(stream) = self.output.stream(index) {
                *time_base = stream.time_base();
            }
        }
        self.header_written = true;
        tracing::info!(path = %self.path.display(), streams = self.streams.len(), "Muxer started");
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &Sample) -> VeneerResult<()> {
        let (kind, time_base) = *self
            .streams
            .get(track_index)
            .ok_or_else(|| VeneerError::mux_write(format!("unknown track {track_index}")))?;

        let mut packet = Packet::copy(&sample.data);
        packet.set_stream(track_index);
        packet.set_pts(Some(sample.pts_micros));
        packet.set_dts(Some(sample.dts_micros.unwrap_or(sample.pts_micros)));
        packet.set_duration(sample.duration_micros);
        if sample.flags.key_frame {
            packet.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        packet.rescale_ts(MICROS, time_base);

        packet.write_interleaved(&mut self.output).map_err(|e| {
            VeneerError::mux_write(format!(
                "failed to write {kind} sample at {}us: {e}",
                sample.pts_micros
            ))
        })
    }

    fn finalize(&mut self) -> VeneerResult<()> {
        if !self.header_written {
            return Err(VeneerError::mux_write("finalize before start"));
        }
        if self.trailer_written {
            return Ok(());
        }
        self.output
            .write_trailer()
            .map_err(|e| VeneerError::mux_write(format!("failed to write trailer: {e}")))?;
        self.trailer_written = true;
        Ok(())
    }
}
