//! Encoding of frames into still images and videos.
use std::io::Cursor;

use dicom_archive_store::ArchiveDir;
use image::codecs::bmp::BmpEncoder;
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::tiff::TiffEncoder;
use image::{Delay, ExtendedColorType, ImageEncoder};
use snafu::{ensure, OptionExt, ResultExt};
use tracing::debug;

use crate::avi::MjpegWriter;
use crate::decode::{self, PixelBuffer};
use crate::frame::Frame;
use crate::normalize::normalize;
use crate::{
    DecodeSnafu, EmptyInputSnafu, EncodeImageSnafu, FrameSizeMismatchSnafu,
    IncompatibleTargetSnafu, InvalidFrameRateSnafu, InvalidQualitySnafu, Result, WriteVideoSnafu,
};

/// Still image file formats.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StillFormat {
    Bmp,
    Tiff,
    Png,
    Jpeg,
}

impl StillFormat {
    pub const ALL: [StillFormat; 4] = [
        StillFormat::Bmp,
        StillFormat::Tiff,
        StillFormat::Png,
        StillFormat::Jpeg,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            StillFormat::Bmp => "bmp",
            StillFormat::Tiff => "tif",
            StillFormat::Png => "png",
            StillFormat::Jpeg => "jpg",
        }
    }

    /// The archive directory collecting images of this format.
    pub fn archive_dir(self) -> ArchiveDir {
        match self {
            StillFormat::Bmp => ArchiveDir::Bmp,
            StillFormat::Tiff => ArchiveDir::Tiff,
            StillFormat::Png => ArchiveDir::Png,
            StillFormat::Jpeg => ArchiveDir::Jpeg,
        }
    }
}

/// Video container formats.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    /// Animated GIF
    Gif,
    /// Motion JPEG in an AVI container
    Avi,
}

impl VideoFormat {
    pub fn extension(self) -> &'static str {
        match self {
            VideoFormat::Gif => "gif",
            VideoFormat::Avi => "avi",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Still(StillFormat),
    Video(VideoFormat),
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Still(format) => format.extension(),
            TargetFormat::Video(format) => format.extension(),
        }
    }
}

/// Format specific encoding options.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EncodeOptions {
    /// JPEG quality from 1 to 100,
    /// also used for the frames of Motion JPEG videos
    pub jpeg_quality: u8,
    /// PNG compression level
    pub png_compression: CompressionType,
    /// Frames per second of videos
    pub frame_rate: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            jpeg_quality: 100,
            png_compression: CompressionType::Default,
            frame_rate: 10,
        }
    }
}

/// Encode a pixel buffer in the target format.
///
/// A single frame can be encoded in any format,
/// becoming a one frame video if the target is a video format.
/// A sequence can only be encoded as a video,
/// and fails with [`EmptyInput`](crate::Error::EmptyInput)
/// if it has no frames.
pub fn encode(pixels: PixelBuffer, target: TargetFormat, options: &EncodeOptions) -> Result<Vec<u8>> {
    match (pixels, target) {
        (PixelBuffer::Sequence(frames), _) if frames.len() == 0 => EmptyInputSnafu.fail(),
        (PixelBuffer::Single(frame), TargetFormat::Still(format)) => {
            encode_still(&frame, format, options)
        }
        (PixelBuffer::Sequence(frames), TargetFormat::Still(format)) => IncompatibleTargetSnafu {
            format,
            frames: frames.len(),
        }
        .fail(),
        (PixelBuffer::Single(frame), TargetFormat::Video(format)) => {
            encode_video(std::iter::once(Ok(frame)), format, options)
        }
        (PixelBuffer::Sequence(frames), TargetFormat::Video(format)) => {
            encode_video(frames, format, options)
        }
    }
}

/// Encode a single frame as a still image.
pub fn encode_still(frame: &Frame, format: StillFormat, options: &EncodeOptions) -> Result<Vec<u8>> {
    let frame = normalize(frame.clone());
    let width = frame.columns() as u32;
    let height = frame.rows() as u32;
    let color = if frame.color().is_monochrome() {
        ExtendedColorType::L8
    } else {
        ExtendedColorType::Rgb8
    };
    let samples = frame.to_interleaved();

    let mut out = Vec::new();
    match format {
        StillFormat::Bmp => BmpEncoder::new(&mut out).write_image(&samples, width, height, color),
        StillFormat::Tiff => {
            let mut cursor = Cursor::new(&mut out);
            TiffEncoder::new(&mut cursor).write_image(&samples, width, height, color)
        }
        StillFormat::Png => {
            PngEncoder::new_with_quality(&mut out, options.png_compression, FilterType::Adaptive)
                .write_image(&samples, width, height, color)
        }
        StillFormat::Jpeg => {
            ensure!(
                (1..=100).contains(&options.jpeg_quality),
                InvalidQualitySnafu {
                    quality: options.jpeg_quality
                }
            );
            JpegEncoder::new_with_quality(&mut out, options.jpeg_quality)
                .write_image(&samples, width, height, color)
        }
    }
    .context(EncodeImageSnafu)?;

    debug!("Encoded {}x{} frame as {:?}, {} bytes", width, height, format, out.len());
    Ok(out)
}

/// Encode frames in order as a video.
///
/// Frames are consumed one at a time,
/// so a lazily decoded sequence is never fully held in memory.
/// All frames must have the size of the first one.
pub fn encode_video<I>(frames: I, format: VideoFormat, options: &EncodeOptions) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = decode::Result<Frame>>,
{
    ensure!(
        options.frame_rate > 0,
        InvalidFrameRateSnafu {
            frame_rate: options.frame_rate
        }
    );
    let mut frames = frames.into_iter();
    let first = frames
        .next()
        .context(EmptyInputSnafu)?
        .context(DecodeSnafu)?;
    let size = (first.rows(), first.columns());
    let frames = std::iter::once(Ok(first)).chain(frames).enumerate().map(|(index, frame)| {
        let frame = normalize(frame.context(DecodeSnafu)?);
        let actual = (frame.rows(), frame.columns());
        ensure!(
            actual == size,
            FrameSizeMismatchSnafu {
                index,
                expected: size,
                actual,
            }
        );
        Ok(frame)
    });

    let out = match format {
        VideoFormat::Gif => encode_gif(frames, options)?,
        VideoFormat::Avi => encode_avi(frames, size, options)?,
    };
    debug!("Encoded {:?} video, {} bytes", format, out.len());
    Ok(out)
}

fn encode_gif(frames: impl Iterator<Item = Result<Frame>>, options: &EncodeOptions) -> Result<Vec<u8>> {
    let delay = Delay::from_numer_denom_ms(1000, options.frame_rate);
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, 10);
        encoder
            .set_repeat(Repeat::Infinite)
            .context(EncodeImageSnafu)?;
        for frame in frames {
            let rgba = frame?.to_dynamic_image()?.to_rgba8();
            encoder
                .encode_frame(image::Frame::from_parts(rgba, 0, 0, delay))
                .context(EncodeImageSnafu)?;
        }
    }
    Ok(out)
}

fn encode_avi(
    frames: impl Iterator<Item = Result<Frame>>,
    (rows, columns): (usize, usize),
    options: &EncodeOptions,
) -> Result<Vec<u8>> {
    let mut writer = MjpegWriter::new(
        Cursor::new(Vec::new()),
        columns as u32,
        rows as u32,
        options.frame_rate,
    )
    .context(WriteVideoSnafu)?;
    for frame in frames {
        let jpeg = encode_still(&frame?.to_rgb(), StillFormat::Jpeg, options)?;
        writer.write_frame(&jpeg).context(WriteVideoSnafu)?;
    }
    Ok(writer.finish().context(WriteVideoSnafu)?.into_inner())
}
