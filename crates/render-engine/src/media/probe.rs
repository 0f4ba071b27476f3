use std::path::Path;

use ffmpeg_next::{codec, encoder, ffi, format, media, Rational, Rescale};
use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::{MediaDescriptor, MediaProbe, Rotation};

use super::MICROS;

const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Describe `path` without exporting it.
pub fn probe_media(path: &Path) -> VeneerResult<MediaProbe> {
    super::init()?;
    let input = open_input(path)?;

    let video = input
        .streams()
        .best(media::Type::Video)
        .ok_or_else(|| VeneerError::no_video_track(format!("{} has no video track", path.display())))?;
    let descriptor = read_descriptor(&input, &video)?;
    let output = descriptor.output_geometry()?;

    let audio_codec = input
        .streams()
        .best(media::Type::Audio)
        .map(|stream| stream.parameters().id().name().to_string());

    Ok(MediaProbe {
        estimated_frames: descriptor.estimated_frames(),
        video_codec: video.parameters().id().name().to_string(),
        container: input.format().name().to_string(),
        audio_codec,
        output,
        descriptor,
    })
}

/// Names from `candidates` that the linked FFmpeg can encode with.
pub fn available_encoders(candidates: &[String]) -> Vec<String> {
    if super::init().is_err() {
        return Vec::new();
    }
    candidates
        .iter()
        .filter(|name| encoder::find_by_name(name).is_some())
        .cloned()
        .collect()
}

pub(crate) fn open_input(path: &Path) -> VeneerResult<format::context::Input> {
    if !path.exists() {
        return Err(VeneerError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    format::input(&path).map_err(|e| {
        VeneerError::decode_init(format!("failed to open {}: {e}", path.display()))
    })
}

/// Build the immutable descriptor for `stream`.
pub(crate) fn read_descriptor(
    input: &format::context::Input,
    stream: &format::stream::Stream,
) -> VeneerResult<MediaDescriptor> {
    let decoder = codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| VeneerError::decode_init(format!("unsupported video stream: {e}")))?;

    let descriptor = MediaDescriptor {
        width: decoder.width(),
        height: decoder.height(),
        rotation: stream_rotation(stream),
        duration_micros: stream_duration_micros(input, stream),
        frame_rate: stream_frame_rate(stream),
        mime_type: format!("video/{}", decoder.id().name()),
    };
    descriptor.validate()?;
    Ok(descriptor)
}

fn stream_frame_rate(stream: &format::stream::Stream) -> f64 {
    [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .map(f64::from)
        .find(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(FALLBACK_FRAME_RATE)
}

fn stream_duration_micros(input: &format::context::Input, stream: &format::stream::Stream) -> i64 {
    let duration = stream.duration();
    if duration > 0 && duration != ffi::AV_NOPTS_VALUE {
        return duration.rescale(stream.time_base(), MICROS);
    }
    // Container duration is already in AV_TIME_BASE units.
    input.duration().max(0)
}

/// Clockwise display rotation from the display matrix, falling back to
/// the legacy `rotate` tag.
pub(crate) fn stream_rotation(stream: &format::stream::Stream) -> Rotation {
    if let Some(ccw) = display_matrix_rotation(stream) {
        let rotation = Rotation::nearest(-ccw);
        let off_by = (f64::from(rotation.degrees()) - (-ccw).rem_euclid(360.0)).abs();
        if off_by > 0.5 && off_by < 359.5 {
            tracing::warn!(
                angle = -ccw,
                snapped = rotation.degrees(),
                "Display matrix is not a quarter turn; snapping"
            );
        }
        return rotation;
    }

    stream
        .metadata()
        .get("rotate")
        .and_then(|tag| tag.trim().parse::<i64>().ok())
        .and_then(Rotation::from_degrees)
        .unwrap_or_default()
}

fn display_matrix_rotation(stream: &format::stream::Stream) -> Option<f64> {
    // SAFETY: codecpar and its side data belong to the open input, which
    // outlives `stream`.
    let angle = unsafe {
        let par = (*stream.as_ptr()).codecpar;
        if par.is_null() {
            return None;
        }
        let side = ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side.is_null() || (*side).size < 9 * std::mem::size_of::<i32>() {
            return None;
        }
        ffi::av_display_rotation_get((*side).data as *const i32)
    };
    angle.is_finite().then_some(angle)
}

/// Timestamp in `time_base` to microseconds.
pub(crate) fn to_micros(ts: i64, time_base: Rational) -> i64 {
    ts.rescale(time_base, MICROS)
}
