//! Error types shared across Veneer crates.
//!
//! Every variant is terminal for an export: nothing in the pipeline retries.
//! Callers that want a fallback strategy own that policy themselves.

use std::path::PathBuf;

/// Top-level error type for Veneer operations.
#[derive(Debug, thiserror::Error)]
pub enum VeneerError {
    #[error("Input not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("No video track: {message}")]
    NoVideoTrack { message: String },

    #[error("Overlay decode failed: {message}")]
    OverlayDecodeFailed { message: String },

    #[error("Compositor init failed: {message}")]
    CompositorInitFailed { message: String },

    #[error("Decoder init failed: {message}")]
    DecodeInitFailed { message: String },

    #[error("Decode error: {message}")]
    DecodeError { message: String },

    #[error("Encoder init failed: {message}")]
    EncodeInitFailed { message: String },

    #[error("Encode error: {message}")]
    EncodeError { message: String },

    #[error("Muxer init failed: {message}")]
    MuxInitFailed { message: String },

    #[error("Mux write error: {message}")]
    MuxWriteError { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using VeneerError.
pub type VeneerResult<T> = Result<T, VeneerError>;

/// Pipeline stage an error originated from, for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Input,
    Source,
    Compositor,
    Sink,
    Muxer,
    Environment,
}

impl ErrorStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Source => "source",
            Self::Compositor => "compositor",
            Self::Sink => "sink",
            Self::Muxer => "muxer",
            Self::Environment => "environment",
        }
    }
}

impl VeneerError {
    pub fn no_video_track(msg: impl Into<String>) -> Self {
        Self::NoVideoTrack {
            message: msg.into(),
        }
    }

    pub fn overlay(msg: impl Into<String>) -> Self {
        Self::OverlayDecodeFailed {
            message: msg.into(),
        }
    }

    pub fn compositor_init(msg: impl Into<String>) -> Self {
        Self::CompositorInitFailed {
            message: msg.into(),
        }
    }

    pub fn decode_init(msg: impl Into<String>) -> Self {
        Self::DecodeInitFailed {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError {
            message: msg.into(),
        }
    }

    pub fn encode_init(msg: impl Into<String>) -> Self {
        Self::EncodeInitFailed {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::EncodeError {
            message: msg.into(),
        }
    }

    pub fn mux_init(msg: impl Into<String>) -> Self {
        Self::MuxInitFailed {
            message: msg.into(),
        }
    }

    pub fn mux_write(msg: impl Into<String>) -> Self {
        Self::MuxWriteError {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> ErrorStage {
        match self {
            Self::InputNotFound { .. } | Self::OverlayDecodeFailed { .. } => ErrorStage::Input,
            Self::NoVideoTrack { .. } | Self::DecodeInitFailed { .. } | Self::DecodeError { .. } => {
                ErrorStage::Source
            }
            Self::CompositorInitFailed { .. } => ErrorStage::Compositor,
            Self::EncodeInitFailed { .. } | Self::EncodeError { .. } => ErrorStage::Sink,
            Self::MuxInitFailed { .. } | Self::MuxWriteError { .. } => ErrorStage::Muxer,
            Self::Config { .. }
            | Self::Unsupported { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorStage::Environment,
        }
    }
}
