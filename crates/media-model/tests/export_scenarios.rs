use veneer_common::ExportDefaults;
use veneer_media_model::{
    CoverCrop, EncoderSettings, MediaDescriptor, OutputGeometry, OverlayImage, Rotation,
};

fn descriptor(width: u32, height: u32, rotation: Rotation) -> MediaDescriptor {
    MediaDescriptor {
        width,
        height,
        rotation,
        duration_micros: 10_000_000,
        frame_rate: 30.0,
        mime_type: "video/avc".to_string(),
    }
}

fn opaque_center_square(size: u32, square: u32) -> OverlayImage {
    let lo = (size - square) / 2;
    let hi = lo + square;
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let inside = (lo..hi).contains(&x) && (lo..hi).contains(&y);
            pixels.extend_from_slice(&[255, 255, 255, if inside { 255 } else { 0 }]);
        }
    }
    OverlayImage::from_rgba(size, size, pixels).expect("valid overlay")
}

#[test]
fn full_hd_landscape_with_square_overlay() {
    let desc = descriptor(1920, 1080, Rotation::None);
    let geometry = desc.output_geometry().expect("geometry");
    assert_eq!(geometry, OutputGeometry { width: 1920, height: 1072 });
    assert_eq!(desc.estimated_frames(), 300);

    let settings = EncoderSettings::new(geometry, desc.frame_rate, &ExportDefaults::default());
    assert_eq!(settings.bitrate, 4_000_000);

    // Square on wide: width fills, height overhangs and is cropped evenly.
    let crop = CoverCrop::compute(500, 500, geometry).expect("crop");
    assert_eq!(crop.scaled_width, 1920);
    assert_eq!(crop.offset_x, 0);
    assert_eq!(crop.offset_y, (1920 - 1072) / 2);

    let overlay = opaque_center_square(500, 100).cover_to(geometry).expect("cover");
    assert_eq!((overlay.width(), overlay.height()), (1920, 1072));

    // The opaque square stays centered in the output.
    let alpha = |x: u32, y: u32| overlay.pixels()[((y * overlay.width() + x) * 4 + 3) as usize];
    assert_eq!(alpha(960, 536), 255);
    assert_eq!(alpha(10, 536), 0);
    assert_eq!(alpha(960, 10), 0);
}

#[test]
fn rotated_portrait_source_swaps_axes() {
    let desc = descriptor(1080, 1920, Rotation::Cw90);
    let geometry = desc.output_geometry().expect("geometry");
    assert_eq!(geometry.width, 1920);
    assert_eq!(geometry.height, 1072);
    assert_eq!(geometry.width % 16, 0);
    assert_eq!(geometry.height % 16, 0);
}

#[test]
fn upside_down_source_keeps_axes() {
    let desc = descriptor(1280, 720, Rotation::Cw180);
    let geometry = desc.output_geometry().expect("geometry");
    assert_eq!(geometry, OutputGeometry { width: 1280, height: 720 });
}

#[test]
fn transparent_overlay_stays_transparent_after_cover() {
    let geometry = OutputGeometry { width: 320, height: 176 };
    let overlay = OverlayImage::transparent(64, 48)
        .expect("overlay")
        .cover_to(geometry)
        .expect("cover");
    assert!(overlay.is_fully_transparent());
}
