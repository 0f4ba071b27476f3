use std::path::Path;

use ffmpeg_next::{format, media, Packet, Rational};
use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::{Sample, SampleFlags};

use super::muxer::StreamFormat;
use super::probe::{open_input, to_micros};
use crate::stage::AudioSource;

/// Second demuxer over the input, yielding its audio packets unchanged.
pub struct FfmpegAudioTrack {
    input: format::context::Input,
    stream_index: usize,
    time_base: Rational,
    format: StreamFormat,
    samples: u64,
}

impl FfmpegAudioTrack {
    /// Open the audio track of `path`, or `None` when it has none.
    pub fn open(path: &Path) -> VeneerResult<Option<Self>> {
        super::init()?;
        let input = open_input(path)?;

        let Some((stream_index, time_base, parameters)) = input
            .streams()
            .best(media::Type::Audio)
            .map(|stream| (stream.index(), stream.time_base(), stream.parameters()))
        else {
            tracing::debug!(path = %path.display(), "Input has no audio track");
            return Ok(None);
        };

        tracing::info!(
            codec = ?parameters.id(),
            stream = stream_index,
            "Audio passthrough enabled"
        );
        Ok(Some(Self {
            input,
            stream_index,
            time_base,
            format: StreamFormat {
                parameters,
                time_base,
            },
            samples: 0,
        }))
    }
}

impl AudioSource for FfmpegAudioTrack {
    type Format = StreamFormat;

    fn format(&self) -> StreamFormat {
        self.format.clone()
    }

    fn next_sample(&mut self) -> VeneerResult<Option<Sample>> {
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => {
                    tracing::debug!(samples = self.samples, "Audio track exhausted");
                    return Ok(None);
                }
                Err(err) => {
                    return Err(VeneerError::decode(format!(
                        "failed to read audio packet: {err}"
                    )));
                }
            }
            if packet.stream() != self.stream_index {
                continue;
            }
            let Some(data) = packet.data() else {
                continue;
            };

            let Some(pts) = packet.pts().or(packet.dts()) else {
                tracing::warn!(index = self.samples, "Dropping audio packet without timestamps");
                continue;
            };
            let mut sample = Sample::new(data.to_vec(), to_micros(pts, self.time_base))
                .with_duration(to_micros(packet.duration(), self.time_base));
            if let Some(dts) = packet.dts() {
                sample = sample.with_dts(to_micros(dts, self.time_base));
            }
            if packet.is_key() {
                sample = sample.with_flags(SampleFlags::KEY_FRAME);
            }
            self.samples += 1;
            return Ok(Some(sample));
        }
    }
}
