//! Track binding and start-once rules around a [`Muxer`].
//!
//! Tracks are bound lazily when their producer first reports an output
//! format. The muxer starts exactly once, as soon as every expected track
//! is bound, and no sample reaches it before that.

use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::{Sample, TrackBinding, TrackKind};

use crate::stage::Muxer;

pub struct MuxSession<M: Muxer> {
    muxer: M,
    expect_audio: bool,
    video: Option<TrackBinding<M::Format>>,
    audio: Option<TrackBinding<M::Format>>,
    started: bool,
    finalized: bool,
    stats: MuxStats,
}

/// Per-session write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    pub video_samples: u64,
    pub audio_samples: u64,
    /// Codec-config samples dropped instead of written.
    pub config_samples: u64,
}

impl<M: Muxer> MuxSession<M> {
    pub fn new(muxer: M, expect_audio: bool) -> Self {
        Self {
            muxer,
            expect_audio,
            video: None,
            audio: None,
            started: false,
            finalized: false,
            stats: MuxStats::default(),
        }
    }

    /// Add the track for `kind`, starting the muxer once all expected tracks
    /// exist. Returns the muxer track index.
    pub fn bind(&mut self, kind: TrackKind, format: M::Format) -> VeneerResult<usize> {
        if self.started {
            return Err(VeneerError::mux_init(format!(
                "{kind} track reported a format after the muxer started"
            )));
        }
        let slot = match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio if self.expect_audio => &mut self.audio,
            TrackKind::Audio => {
                return Err(VeneerError::mux_init("audio track was not expected"));
            }
        };
        if slot.is_some() {
            return Err(VeneerError::mux_init(format!("{kind} track bound twice")));
        }

        let track_index = self.muxer.add_track(kind, &format)?;
        tracing::debug!(track = %kind, track_index, "Track bound");
        *slot = Some(TrackBinding {
            kind,
            track_index,
            format,
        });

        if self.all_bound() {
            self.muxer.start()?;
            self.started = true;
            tracing::debug!(audio = self.expect_audio, "Muxer started");
        }
        Ok(track_index)
    }

    /// Write a sample to the track bound for `kind`.
    pub fn write(&mut self, kind: TrackKind, sample: &Sample) -> VeneerResult<()> {
        if !self.started {
            return Err(VeneerError::mux_write(format!(
                "{kind} sample at {}us arrived before the muxer started",
                sample.pts_micros
            )));
        }
        if self.finalized {
            return Err(VeneerError::mux_write("sample written after finalize"));
        }
        let track_index = self
            .binding(kind)
            .map(|binding| binding.track_index)
            .ok_or_else(|| VeneerError::mux_write(format!("no {kind} track bound")))?;

        // Config data travels in the track format; its payload is zero-sized
        // and never written.
        if sample.flags.codec_config {
            self.stats.config_samples += 1;
            return Ok(());
        }
        if sample.is_empty() {
            return Ok(());
        }

        self.muxer.write_sample(track_index, sample)?;
        match kind {
            TrackKind::Video => self.stats.video_samples += 1,
            TrackKind::Audio => self.stats.audio_samples += 1,
        }
        Ok(())
    }

    /// Write the trailer. Only valid after a successful start.
    pub fn finalize(&mut self) -> VeneerResult<()> {
        if !self.started {
            return Err(VeneerError::mux_write("finalize before the muxer started"));
        }
        if self.finalized {
            return Ok(());
        }
        self.muxer.finalize()?;
        self.finalized = true;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn stats(&self) -> MuxStats {
        self.stats
    }

    pub fn binding(&self, kind: TrackKind) -> Option<&TrackBinding<M::Format>> {
        match kind {
            TrackKind::Video => self.video.as_ref(),
            TrackKind::Audio => self.audio.as_ref(),
        }
    }

    fn all_bound(&self) -> bool {
        self.video.is_some() && (!self.expect_audio || self.audio.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingMuxer {
        ops: Vec<String>,
    }

    impl Muxer for RecordingMuxer {
        type Format = &'static str;

        fn add_track(&mut self, kind: TrackKind, format: &&'static str) -> VeneerResult<usize> {
            self.ops.push(format!("add {kind} {format}"));
            Ok(self.ops.iter().filter(|op| op.starts_with("add")).count() - 1)
        }

        fn start(&mut self) -> VeneerResult<()> {
            self.ops.push("start".to_string());
            Ok(())
        }

        fn write_sample(&mut self, track_index: usize, sample: &Sample) -> VeneerResult<()> {
            self.ops
                .push(format!("write {track_index} {}", sample.pts_micros));
            Ok(())
        }

        fn finalize(&mut self) -> VeneerResult<()> {
            self.ops.push("finalize".to_string());
            Ok(())
        }
    }

    fn sample(pts: i64) -> Sample {
        Sample::new(vec![0xAB; 8], pts)
    }

    #[test]
    fn test_video_only_starts_on_first_bind() {
        let mut session = MuxSession::new(RecordingMuxer::default(), false);
        assert_eq!(session.bind(TrackKind::Video, "avc").unwrap(), 0);
        assert!(session.is_started());
        session.write(TrackKind::Video, &sample(0)).unwrap();
        session.finalize().unwrap();
        assert_eq!(
            session.muxer.ops,
            vec!["add video avc", "start", "write 0 0", "finalize"]
        );
    }

    #[test]
    fn test_waits_for_audio_before_start() {
        let mut session = MuxSession::new(RecordingMuxer::default(), true);
        session.bind(TrackKind::Video, "avc").unwrap();
        assert!(!session.is_started());

        let err = session.write(TrackKind::Video, &sample(0)).unwrap_err();
        assert!(matches!(err, VeneerError::MuxWriteError { .. }));

        assert_eq!(session.bind(TrackKind::Audio, "aac").unwrap(), 1);
        assert!(session.is_started());
        session.write(TrackKind::Audio, &sample(10)).unwrap();
        assert_eq!(session.muxer.ops.iter().filter(|o| *o == "start").count(), 1);
        assert_eq!(session.muxer.ops.last().unwrap(), "write 1 10");
    }

    #[test]
    fn test_bind_after_start_rejected() {
        let mut session = MuxSession::new(RecordingMuxer::default(), false);
        session.bind(TrackKind::Video, "avc").unwrap();
        let err = session.bind(TrackKind::Video, "avc").unwrap_err();
        assert!(matches!(err, VeneerError::MuxInitFailed { .. }));
        assert!(session.bind(TrackKind::Audio, "aac").is_err());
    }

    #[test]
    fn test_unexpected_audio_rejected() {
        let mut session = MuxSession::new(RecordingMuxer::default(), false);
        let err = session.bind(TrackKind::Audio, "aac").unwrap_err();
        assert!(matches!(err, VeneerError::MuxInitFailed { .. }));
    }

    #[test]
    fn test_codec_config_samples_not_written() {
        let mut session = MuxSession::new(RecordingMuxer::default(), false);
        session.bind(TrackKind::Video, "avc").unwrap();
        let config = sample(0).with_flags(veneer_media_model::SampleFlags::CODEC_CONFIG);
        session.write(TrackKind::Video, &config).unwrap();
        session.write(TrackKind::Video, &sample(33)).unwrap();

        assert_eq!(session.stats().config_samples, 1);
        assert_eq!(session.stats().video_samples, 1);
        assert!(!session.muxer.ops.iter().any(|o| o == "write 0 0"));
    }

    #[test]
    fn test_finalize_requires_start() {
        let mut session = MuxSession::new(RecordingMuxer::default(), true);
        assert!(session.finalize().is_err());
    }
}
