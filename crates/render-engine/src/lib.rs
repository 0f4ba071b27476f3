//! Veneer Render Engine
//!
//! Offline pipeline that blends a still RGBA overlay over every frame of a
//! source video and writes the result to a new container, passing any
//! audio through untouched.
//!
//! # Pipeline Architecture
//!
//! ```text
//! input.mp4 ──► FrameSource ──► VideoSurface ─┐
//!                 (decode)       (wgpu)       │
//!                                             ├──► Compositor ──► EncoderSurface
//! overlay.png ──► cover-crop ─────────────────┘      (wgpu)            │
//!                                                                      ▼
//!                                                                  FrameSink
//!                                                                   (H.264)
//!                                                                      │
//! input.mp4 ──► AudioSource (passthrough) ──────────────────────► MuxSession ──► output.mp4
//! ```
//!
//! [`driver::PipelineDriver`] runs every stage from one thread. The GPU
//! device is polled on its own thread, which raises the frame-available
//! signal the driver waits on. When the GPU pipeline cannot run, the
//! `ffmpeg` executable renders the same composite instead.

pub mod backend;
pub mod compositor;
pub mod driver;
pub mod export;
pub mod gpu;
#[cfg(feature = "ffmpeg")]
pub mod media;
pub mod mux;
pub mod progress;
pub mod signal;
pub mod stage;

pub use backend::{select_backend, FfmpegCliBackend};
#[cfg(feature = "ffmpeg")]
pub use backend::GpuBackend;
pub use driver::{DriverOptions, PipelineDriver, PipelineState, PipelineSummary};
pub use export::*;
pub use stage::{FrameResult, GpuFrame, SinkEvent};
