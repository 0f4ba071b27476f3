//! Output frame geometry and the overlay cover-crop rule.

use serde::{Deserialize, Serialize};
use veneer_common::{VeneerError, VeneerResult};

use crate::descriptor::Rotation;

/// Hardware encoders work in 16x16 macroblocks; both output dimensions
/// are rounded down to a multiple of this.
pub const MACROBLOCK_ALIGNMENT: u32 = 16;

/// Encoded frame size. Both dimensions are non-zero multiples of
/// [`MACROBLOCK_ALIGNMENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
}

impl OutputGeometry {
    /// Geometry for a source of natural size `width`x`height` displayed
    /// with `rotation`.
    pub fn for_source(width: u32, height: u32, rotation: Rotation) -> VeneerResult<Self> {
        let (w, h) = if rotation.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        };
        let geometry = Self {
            width: align_down(w),
            height: align_down(h),
        };
        if geometry.width == 0 || geometry.height == 0 {
            return Err(VeneerError::encode_init(format!(
                "{w}x{h} is smaller than one {MACROBLOCK_ALIGNMENT}px macroblock"
            )));
        }
        Ok(geometry)
    }
}

impl std::fmt::Display for OutputGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn align_down(value: u32) -> u32 {
    value - value % MACROBLOCK_ALIGNMENT
}

/// How an image is scaled and cropped to fill a target exactly.
///
/// The image is scaled uniformly until it covers the target on both axes,
/// then the overhang on the longer axis is cropped equally from both sides.
/// Never letterboxes.
///
/// `scaled_*` and `offset_*` describe the rule in scaled space. They can be
/// far larger than any buffer worth allocating, so the pixels are produced
/// from the equivalent `source_*` rectangle instead: crop the source first,
/// then resample straight to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverCrop {
    pub scaled_width: u64,
    pub scaled_height: u64,
    pub offset_x: u64,
    pub offset_y: u64,
    pub width: u32,
    pub height: u32,
    pub source_x: u32,
    pub source_y: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl CoverCrop {
    /// Cover-crop a `src_w`x`src_h` image onto `target`.
    pub fn compute(src_w: u32, src_h: u32, target: OutputGeometry) -> VeneerResult<Self> {
        if src_w == 0 || src_h == 0 {
            return Err(VeneerError::overlay(format!(
                "cannot cover {target} with an empty {src_w}x{src_h} image"
            )));
        }
        if target.width == 0 || target.height == 0 {
            return Err(VeneerError::overlay(format!("cannot cover an empty {target} target")));
        }
        let (sw, sh) = (u64::from(src_w), u64::from(src_h));
        let (tw, th) = (u64::from(target.width), u64::from(target.height));

        // u32 * u32 always fits in u64. Compare aspects without floats:
        // sw/sh >= tw/th means the source is wider and its sides are cropped.
        let wider = sw * th >= sh * tw;
        let (scaled_w, scaled_h) = if wider {
            ((sw * th).div_ceil(sh).max(tw), th)
        } else {
            (tw, (sh * tw).div_ceil(sw).max(th))
        };

        // The same window in source pixels, rounded to nearest, at least one
        // pixel and never larger than the source.
        let (source_w, source_h) = if wider {
            (round_div(sh * tw, th).clamp(1, sw), sh)
        } else {
            (sw, round_div(sw * th, tw).clamp(1, sh))
        };
        let to_u32 = |value: u64| {
            u32::try_from(value).map_err(|_| {
                VeneerError::overlay(format!("crop window {value} exceeds the source size"))
            })
        };

        Ok(Self {
            scaled_width: scaled_w,
            scaled_height: scaled_h,
            offset_x: (scaled_w - tw) / 2,
            offset_y: (scaled_h - th) / 2,
            width: target.width,
            height: target.height,
            source_x: to_u32((sw - source_w) / 2)?,
            source_y: to_u32((sh - source_h) / 2)?,
            source_width: to_u32(source_w)?,
            source_height: to_u32(source_h)?,
        })
    }

    /// Whether the source already matches the target and needs no resample.
    pub fn is_identity(&self) -> bool {
        self.scaled_width == u64::from(self.width) && self.scaled_height == u64::from(self.height)
    }
}

fn round_div(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator / 2) / denominator
}
