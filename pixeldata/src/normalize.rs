//! Color model normalization.
//!
//! Normalized frames are either grayscale with black as the minimum
//! ([`ColorModel::Monochrome2`]) or [`ColorModel::Rgb`].
//! Normalization is a pure function of each frame,
//! so every frame of a sequence goes through the exact same conversion.
use ndarray::{Array3, Axis, Zip};

use crate::frame::{ColorModel, Frame};

/// Convert a frame into a displayable color model.
///
/// - luma/chroma samples are converted to RGB
///   with the full range ITU-R BT.601 transform;
/// - MONOCHROME1 samples are inverted.
///
/// Frames already normalized are returned unchanged.
pub fn normalize(frame: Frame) -> Frame {
    let (pixels, color) = frame.into_parts();
    let (pixels, color) = match color {
        ColorModel::Monochrome2 | ColorModel::Rgb => (pixels, color),
        ColorModel::Monochrome1 => (pixels.mapv_into(|v| u8::MAX - v), ColorModel::Monochrome2),
        ColorModel::YbrFull => (ybr_full_to_rgb(&pixels), ColorModel::Rgb),
    };
    Frame::from_parts(pixels, color)
}

fn ybr_full_to_rgb(pixels: &Array3<u8>) -> Array3<u8> {
    let mut out = Array3::zeros(pixels.raw_dim());
    Zip::from(out.lanes_mut(Axis(2)))
        .and(pixels.lanes(Axis(2)))
        .for_each(|mut rgb, ybr| {
            let y = f32::from(ybr[0]);
            let cb = f32::from(ybr[1]) - 128.;
            let cr = f32::from(ybr[2]) - 128.;
            rgb[0] = clamp(y + 1.402 * cr);
            rgb[1] = clamp(y - 0.344_136 * cb - 0.714_136 * cr);
            rgb[2] = clamp(y + 1.772 * cb);
        });
    out
}

fn clamp(value: f32) -> u8 {
    value.round().clamp(0., 255.) as u8
}
