//! Shared GPU resources: the device, its poll thread, and the two textures
//! that frames travel through.

mod context;
mod surface;

pub use context::GpuContext;
pub use surface::{EncoderSurface, PresentedFrame, VideoSurface};

/// Pixel format of every texture in the pipeline. Values pass through
/// unconverted, so no sRGB view is used.
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
