//! Decoded raster frames.
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::{Array3, Axis, ShapeError};
use snafu::{ensure, OptionExt};

use crate::{InvalidImageBufferSnafu, Result, SamplesMismatchSnafu};

/// The color model of the samples in a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ColorModel {
    /// Grayscale, the minimum sample value is white
    Monochrome1,
    /// Grayscale, the minimum sample value is black
    Monochrome2,
    /// Red, green and blue samples
    Rgb,
    /// Full range luma and chroma samples (Y, Cb, Cr)
    YbrFull,
}

impl ColorModel {
    /// The number of samples per pixel in this color model.
    pub fn samples(self) -> usize {
        match self {
            ColorModel::Monochrome1 | ColorModel::Monochrome2 => 1,
            ColorModel::Rgb | ColorModel::YbrFull => 3,
        }
    }

    pub fn is_monochrome(self) -> bool {
        self.samples() == 1
    }
}

/// A single raster frame of 8-bit samples,
/// shaped as (rows, columns, samples).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: Array3<u8>,
    color: ColorModel,
}

impl Frame {
    /// Create a frame,
    /// checking that the number of samples fits the color model.
    pub fn new(pixels: Array3<u8>, color: ColorModel) -> Result<Self> {
        let samples = pixels.len_of(Axis(2));
        ensure!(
            samples == color.samples(),
            SamplesMismatchSnafu { samples, color }
        );
        Ok(Frame { pixels, color })
    }

    /// Samples must already fit the color model.
    pub(crate) fn from_parts(pixels: Array3<u8>, color: ColorModel) -> Self {
        debug_assert_eq!(pixels.len_of(Axis(2)), color.samples());
        Frame { pixels, color }
    }

    /// Create a frame from interleaved samples in row-major order.
    ///
    /// Fails if the number of samples does not match the frame size.
    pub fn from_interleaved(
        rows: usize,
        columns: usize,
        color: ColorModel,
        samples: Vec<u8>,
    ) -> Result<Self, ShapeError> {
        let pixels = Array3::from_shape_vec((rows, columns, color.samples()), samples)?;
        Ok(Frame { pixels, color })
    }

    /// Create an RGB or grayscale frame from a decoded image.
    pub fn from_dynamic_image(image: &DynamicImage) -> Result<Self, ShapeError> {
        match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
                let gray = image.to_luma8();
                let (width, height) = gray.dimensions();
                Frame::from_interleaved(
                    height as usize,
                    width as usize,
                    ColorModel::Monochrome2,
                    gray.into_raw(),
                )
            }
            _ => {
                let rgb = image.to_rgb8();
                let (width, height) = rgb.dimensions();
                Frame::from_interleaved(
                    height as usize,
                    width as usize,
                    ColorModel::Rgb,
                    rgb.into_raw(),
                )
            }
        }
    }

    pub fn rows(&self) -> usize {
        self.pixels.len_of(Axis(0))
    }

    pub fn columns(&self) -> usize {
        self.pixels.len_of(Axis(1))
    }

    pub fn color(&self) -> ColorModel {
        self.color
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    pub fn into_parts(self) -> (Array3<u8>, ColorModel) {
        (self.pixels, self.color)
    }

    /// The samples in row-major interleaved order.
    pub fn to_interleaved(&self) -> Vec<u8> {
        self.pixels.iter().copied().collect()
    }

    /// Convert into an image buffer.
    ///
    /// Samples are taken as they are,
    /// so luma/chroma frames should be normalized first.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        let width = self.columns() as u32;
        let height = self.rows() as u32;
        let samples = self.to_interleaved();
        if self.color.is_monochrome() {
            let buffer = GrayImage::from_raw(width, height, samples).context(InvalidImageBufferSnafu)?;
            Ok(DynamicImage::ImageLuma8(buffer))
        } else {
            let buffer = RgbImage::from_raw(width, height, samples).context(InvalidImageBufferSnafu)?;
            Ok(DynamicImage::ImageRgb8(buffer))
        }
    }

    /// Expand grayscale samples into three identical channels.
    pub fn to_rgb(&self) -> Frame {
        if !self.color.is_monochrome() {
            return self.clone();
        }
        let (rows, columns) = (self.rows(), self.columns());
        let pixels = Array3::from_shape_fn((rows, columns, 3), |(y, x, _)| self.pixels[[y, x, 0]]);
        Frame {
            pixels,
            color: ColorModel::Rgb,
        }
    }
}
