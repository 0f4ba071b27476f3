//! Describe an input video.

use std::path::PathBuf;

use veneer_render_engine::media::probe_media;

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let probe = probe_media(&path)
        .map_err(|e| anyhow::anyhow!("Failed to probe {}: {e}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&probe)?);
        return Ok(());
    }

    let d = &probe.descriptor;
    println!("Video: {}", path.display());
    println!("  Container: {}", probe.container);
    println!("  Codec: {}", probe.video_codec);
    println!("  Coded size: {}x{}", d.width, d.height);
    println!("  Rotation: {}°", d.rotation.degrees());
    println!(
        "  Duration: {:.2}s @ {:.3}fps (~{} frames)",
        d.duration_micros as f64 / 1_000_000.0,
        d.frame_rate,
        probe.estimated_frames
    );
    match &probe.audio_codec {
        Some(codec) => println!("  Audio: {codec} (passthrough)"),
        None => println!("  Audio: none"),
    }
    println!();
    println!("Export output: {}", probe.output);

    let (display_w, display_h) = d.display_size();
    if (display_w, display_h) != (probe.output.width, probe.output.height) {
        println!(
            "  (display size {display_w}x{display_h} aligned down to 16px macroblocks)"
        );
    }
    Ok(())
}
