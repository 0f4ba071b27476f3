//! Render backends and their pre-flight selection.

mod cli;
#[cfg(feature = "ffmpeg")]
mod gpu;

pub use cli::{ffmpeg_cli_version, FfmpegCliBackend};
#[cfg(feature = "ffmpeg")]
pub use gpu::GpuBackend;

use veneer_common::{BackendPreference, VeneerError, VeneerResult};

use crate::export::RenderBackend;

/// Pick the backend for `preference`. The choice is final: a backend that
/// fails mid-export is not retried on another one.
pub fn select_backend(preference: BackendPreference) -> VeneerResult<Box<dyn RenderBackend>> {
    let candidates: Vec<Box<dyn RenderBackend>> = match preference {
        BackendPreference::Auto => vec![gpu_backend(), Some(cli_backend())]
            .into_iter()
            .flatten()
            .collect(),
        BackendPreference::Gpu => gpu_backend().into_iter().collect(),
        BackendPreference::FfmpegCli => vec![cli_backend()],
    };

    let mut tried = Vec::new();
    for backend in candidates {
        if backend.is_available() {
            tracing::info!(backend = backend.name(), ?preference, "Selected render backend");
            return Ok(backend);
        }
        tracing::debug!(backend = backend.name(), "Render backend unavailable");
        tried.push(backend.name().to_string());
    }

    Err(VeneerError::unsupported(if tried.is_empty() {
        format!("no render backend is compiled in for {preference:?}")
    } else {
        format!("no available render backend (tried {})", tried.join(", "))
    }))
}

#[cfg(feature = "ffmpeg")]
fn gpu_backend() -> Option<Box<dyn RenderBackend>> {
    Some(Box::new(GpuBackend::new()))
}

#[cfg(not(feature = "ffmpeg"))]
fn gpu_backend() -> Option<Box<dyn RenderBackend>> {
    None
}

fn cli_backend() -> Box<dyn RenderBackend> {
    Box::new(FfmpegCliBackend::new())
}
