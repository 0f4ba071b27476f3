//! Check system capabilities.

use veneer_common::ExportDefaults;
use veneer_render_engine::backend::{ffmpeg_cli_version, select_backend};
use veneer_render_engine::gpu::GpuContext;
use veneer_render_engine::media;

pub fn run(defaults: &ExportDefaults) -> anyhow::Result<()> {
    println!("Veneer System Check");
    println!("{}", "=".repeat(50));

    // FFmpeg libraries
    match media::init() {
        Ok(()) => println!("[OK] FFmpeg libraries linked"),
        Err(e) => println!("[FAIL] FFmpeg libraries: {e}"),
    }

    let encoders = media::available_encoders(&defaults.encoders);
    if encoders.is_empty() {
        println!(
            "[FAIL] No configured H.264 encoder available (tried {})",
            defaults.encoders.join(", ")
        );
    } else {
        println!("[OK] H.264 encoders: {}", encoders.join(", "));
    }

    // GPU adapter
    match GpuContext::new() {
        Ok(gpu) => {
            let info = gpu.adapter_info();
            println!("[OK] GPU adapter: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
        }
        Err(e) => println!("[WARN] GPU adapter: {e}"),
    }

    // ffmpeg executable
    match ffmpeg_cli_version() {
        Some(version) => println!("[OK] ffmpeg executable: {version}"),
        None => println!("[WARN] ffmpeg executable not found on PATH"),
    }

    println!();
    match select_backend(defaults.backend) {
        Ok(backend) => println!(
            "Backend '{}' is ready for {:?} exports.",
            backend.name(),
            defaults.backend
        ),
        Err(e) => println!("No usable backend: {e}"),
    }

    Ok(())
}
