//! Composition of frames into a quad montage.
use ndarray::{s, Array3};
use snafu::ensure;

use crate::frame::{ColorModel, Frame};
use crate::normalize::normalize;
use crate::{FrameSizeMismatchSnafu, Result};

/// The width of the border around a montage, in pixels.
pub const DEFAULT_BORDER: usize = 30;

const BORDER_SAMPLE: u8 = u8::MAX;

/// Compose four equally sized frames into a 2x2 RGB montage
/// surrounded by a white border.
///
/// Frames are placed in the order top left, top right, bottom left, bottom right.
pub fn compose_quad(frames: [&Frame; 4], border: usize) -> Result<Frame> {
    let size = (frames[0].rows(), frames[0].columns());
    for (index, frame) in frames.iter().enumerate() {
        let actual = (frame.rows(), frame.columns());
        ensure!(
            actual == size,
            FrameSizeMismatchSnafu {
                index,
                expected: size,
                actual,
            }
        );
    }

    let (rows, columns) = size;
    let mut pixels = Array3::from_elem(
        (2 * rows + 2 * border, 2 * columns + 2 * border, 3),
        BORDER_SAMPLE,
    );
    for (index, frame) in frames.iter().enumerate() {
        let top = border + (index / 2) * rows;
        let left = border + (index % 2) * columns;
        let rgb = normalize((*frame).clone()).to_rgb();
        pixels
            .slice_mut(s![top..top + rows, left..left + columns, ..])
            .assign(rgb.pixels());
    }
    Ok(Frame::from_parts(pixels, ColorModel::Rgb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use matches::assert_matches;

    fn solid(rows: usize, columns: usize, value: u8) -> Frame {
        Frame::from_interleaved(rows, columns, ColorModel::Monochrome2, vec![value; rows * columns])
            .unwrap()
    }

    #[test]
    fn places_quadrants_inside_the_border() {
        let (tl, tr, bl, br) = (solid(4, 6, 10), solid(4, 6, 20), solid(4, 6, 30), solid(4, 6, 40));
        let quad = compose_quad([&tl, &tr, &bl, &br], 2).unwrap();
        assert_eq!(quad.color(), ColorModel::Rgb);
        assert_eq!((quad.rows(), quad.columns()), (12, 16));

        let pixels = quad.pixels();
        assert_eq!(pixels[[0, 0, 0]], 255);
        assert_eq!(pixels[[11, 15, 2]], 255);
        assert_eq!(pixels[[2, 2, 0]], 10);
        assert_eq!(pixels[[2, 8, 1]], 20);
        assert_eq!(pixels[[6, 7, 2]], 30);
        assert_eq!(pixels[[9, 13, 0]], 40);
        // right border
        assert_eq!(pixels[[9, 14, 0]], 255);
    }

    #[test]
    fn rejects_frames_of_different_size() {
        let a = solid(4, 4, 0);
        let b = solid(4, 5, 0);
        assert_matches!(
            compose_quad([&a, &a, &a, &b], DEFAULT_BORDER),
            Err(Error::FrameSizeMismatch { index: 3, .. })
        );
    }
}
