//! This crate turns the pixel data of archived DICOM instances
//! into general purpose still images and videos.
//!
//! The pipeline has three stages:
//!
//! - [`decode`] reads the pixel data element of a [`Dataset`]
//!   into a [`PixelBuffer`],
//!   either a single [`Frame`] or a lazily decoded [`FrameSequence`];
//! - [`normalize`] converts luma/chroma and inverted grayscale frames
//!   into RGB or regular grayscale;
//! - [`encode`] writes a buffer out as a still image or a video.
//!
//! [`batch`] runs the pipeline over every instance of an archive,
//! and [`layout`] composes frames into a quad montage.
//!
//! # Examples
//! ```no_run
//! # use std::error::Error;
//! use dicom_archive_pixeldata::{decode, encode, EncodeOptions, StillFormat, TargetFormat};
//! use dicom_archive_store::{ArchiveLayout, InstanceStore};
//!
//! # fn main() -> Result<(), Box<dyn Error>> {
//! let store = InstanceStore::open(&ArchiveLayout::new("archive"))?;
//! let dataset = store.get("1.2.826.0.1.3680043.2.1125.1")?;
//! let pixels = decode(&dataset)?.normalize();
//! let png = encode(pixels, TargetFormat::Still(StillFormat::Png), &EncodeOptions::default())?;
//! std::fs::write("out.png", png)?;
//! #   Ok(())
//! # }
//! ```
//!
//! [`Dataset`]: dicom_archive_store::Dataset
use std::io;
use std::path::PathBuf;

use snafu::{Backtrace, Snafu};

pub mod attribute;
pub mod avi;
pub mod batch;
pub mod decode;
pub mod encode;
pub mod frame;
pub mod layout;
pub mod normalize;

pub use batch::{convert_archive, convert_instance, BatchItem, BatchOptions, BatchReport};
pub use decode::{decode, Error as DecodeError, FrameSequence, PixelBuffer};
pub use encode::{encode, EncodeOptions, StillFormat, TargetFormat, VideoFormat};
pub use frame::{ColorModel, Frame};
pub use layout::compose_quad;
pub use normalize::normalize;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not decode pixel data"))]
    Decode {
        #[snafu(backtrace)]
        source: DecodeError,
    },

    #[snafu(display("{} samples per pixel do not fit color model {:?}", samples, color))]
    SamplesMismatch {
        samples: usize,
        color: ColorModel,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid buffer when constructing ImageBuffer"))]
    InvalidImageBuffer { backtrace: Backtrace },

    #[snafu(display("No frames to encode"))]
    EmptyInput { backtrace: Backtrace },

    #[snafu(display("Cannot encode a sequence of {} frames as {:?}", frames, format))]
    IncompatibleTarget {
        format: StillFormat,
        frames: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Frame #{} is {}x{}, expected {}x{}",
        index,
        actual.1,
        actual.0,
        expected.1,
        expected.0
    ))]
    FrameSizeMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid JPEG quality {}, must be between 1 and 100", quality))]
    InvalidQuality { quality: u8, backtrace: Backtrace },

    #[snafu(display("Invalid frame rate {}", frame_rate))]
    InvalidFrameRate { frame_rate: u32, backtrace: Backtrace },

    #[snafu(display("Could not encode image"))]
    EncodeImage {
        source: image::ImageError,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not write video"))]
    WriteVideo {
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read instance {}", id))]
    ReadInstance {
        id: String,
        #[snafu(backtrace)]
        source: dicom_archive_store::Error,
    },

    #[snafu(display("Could not list archived instances"))]
    ListInstances {
        #[snafu(backtrace)]
        source: dicom_archive_store::Error,
    },

    #[snafu(display("Could not prepare output directory"))]
    PrepareOutput {
        #[snafu(backtrace)]
        source: dicom_archive_store::layout::Error,
    },

    #[snafu(display("Could not write {}", path.display()))]
    WriteOutput {
        path: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Whether the pixel data itself could not be decoded.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
