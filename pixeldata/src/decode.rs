//! Decoding of the pixel data element into frames.
//!
//! The dimensionality of the pixel data follows the number of frames:
//! a single frame object decodes into [`PixelBuffer::Single`],
//! any other into an ordered [`FrameSequence`].
//! Frames of a sequence are decoded one at a time as the sequence is iterated.
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use dicom_archive_store::Dataset;
use dicom_core::value::{PrimitiveValue, Value};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileDicomObject, InMemDicomObject};
use dicom_pixeldata::{ConvertOptions, PixelDecoder};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::attribute::{self, GetAttributeError};
use crate::frame::{ColorModel, Frame};
use crate::normalize::normalize;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not read image attributes"))]
    Attribute {
        #[snafu(backtrace)]
        source: GetAttributeError,
    },

    #[snafu(display("Missing pixel data"))]
    MissingPixelData { backtrace: Backtrace },

    #[snafu(display("Pixel data element is not a valid pixel buffer"))]
    InvalidPixelData { backtrace: Backtrace },

    #[snafu(display("Unsupported BitsAllocated {}, must be 8 or 16", bits))]
    UnsupportedBitsAllocated { bits: u16, backtrace: Backtrace },

    #[snafu(display("Unsupported BitsStored {} for BitsAllocated {}", bits, allocated))]
    UnsupportedBitsStored {
        bits: u16,
        allocated: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("Unsupported PhotometricInterpretation {}", pi))]
    UnsupportedPhotometricInterpretation { pi: String, backtrace: Backtrace },

    #[snafu(display("Unsupported SamplesPerPixel {} for {}", samples, pi))]
    UnsupportedSamplesPerPixel {
        samples: u16,
        pi: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Unsupported PlanarConfiguration {}", value))]
    UnsupportedPlanarConfiguration { value: u16, backtrace: Backtrace },

    #[snafu(display("Chroma subsampled pixel data needs an even number of columns, got {}", columns))]
    OddColumns { columns: u16, backtrace: Backtrace },

    #[snafu(display("Pixel data has {} bytes, expected {}", actual, expected))]
    PixelDataLength {
        expected: usize,
        actual: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Pixel data of {} frame(s) of {}x{} is too large to address",
        frames,
        columns,
        rows
    ))]
    PixelDataTooLarge {
        rows: u16,
        columns: u16,
        frames: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not decode frame #{}", frame))]
    DecodeFrame {
        frame: u32,
        #[snafu(source(from(dicom_pixeldata::Error, Box::new)))]
        source: Box<dicom_pixeldata::Error>,
    },

    #[snafu(display("Could not convert frame #{} to an image", frame))]
    ConvertFrame {
        frame: u32,
        #[snafu(source(from(dicom_pixeldata::Error, Box::new)))]
        source: Box<dicom_pixeldata::Error>,
    },

    #[snafu(display("Invalid shape for frame #{}", frame))]
    FrameShape {
        frame: u32,
        source: ndarray::ShapeError,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The decoded pixel data of an instance.
#[derive(Debug)]
pub enum PixelBuffer {
    /// A single raster frame
    Single(Frame),
    /// An ordered sequence of frames, such as a cine loop
    Sequence(FrameSequence),
}

impl PixelBuffer {
    /// The number of frames held or yet to be decoded.
    pub fn number_of_frames(&self) -> usize {
        match self {
            PixelBuffer::Single(_) => 1,
            PixelBuffer::Sequence(frames) => frames.len(),
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, PixelBuffer::Sequence(_))
    }

    /// Normalize the color model of every frame.
    ///
    /// See [`normalize`](crate::normalize::normalize).
    pub fn normalize(self) -> PixelBuffer {
        match self {
            PixelBuffer::Single(frame) => PixelBuffer::Single(normalize(frame)),
            PixelBuffer::Sequence(frames) => PixelBuffer::Sequence(frames.normalized()),
        }
    }
}

/// A finite sequence of frames in storage order.
///
/// Iterating the sequence decodes the next frame.
#[derive(Debug)]
pub struct FrameSequence {
    source: FrameSource,
    next: u32,
    count: u32,
    normalize: bool,
}

#[derive(Debug)]
enum FrameSource {
    Native(NativePixels),
    Encapsulated(Box<FileDicomObject<InMemDicomObject>>),
    Decoded(std::vec::IntoIter<Frame>),
}

impl FrameSequence {
    /// A sequence over frames which are already decoded.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        FrameSequence {
            count: frames.len() as u32,
            source: FrameSource::Decoded(frames.into_iter()),
            next: 0,
            normalize: false,
        }
    }

    /// Normalize each frame as it is yielded.
    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }

    fn decode_frame(&mut self, index: u32) -> Option<Result<Frame>> {
        match &mut self.source {
            FrameSource::Native(pixels) => Some(pixels.frame(index)),
            FrameSource::Encapsulated(obj) => Some(decode_encapsulated_frame(obj, index)),
            FrameSource::Decoded(frames) => frames.next().map(Ok),
        }
    }
}

impl Iterator for FrameSequence {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let frame = self.decode_frame(index)?;
        if self.normalize {
            Some(frame.map(normalize))
        } else {
            Some(frame)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameSequence {}

/// Decode the pixel data of a data set.
pub fn decode(dataset: &Dataset) -> Result<PixelBuffer> {
    let obj = dataset.object();
    let pixel_data = obj.get(tags::PIXEL_DATA).context(MissingPixelDataSnafu)?;
    let count = attribute::number_of_frames(obj).context(AttributeSnafu)?;

    let source = match pixel_data.value() {
        Value::Primitive(value) => FrameSource::Native(NativePixels::new(
            obj,
            value,
            count,
            dataset.transfer_syntax(),
        )?),
        Value::PixelSequence(_) => FrameSource::Encapsulated(Box::new(dataset.to_file_object())),
        _ => return InvalidPixelDataSnafu.fail(),
    };
    debug!(
        "Decoding {} frame(s) of instance {}",
        count,
        dataset.sop_instance_uid()
    );

    let mut frames = FrameSequence {
        source,
        next: 0,
        count,
        normalize: false,
    };
    if count == 1 {
        match frames.next() {
            Some(frame) => Ok(PixelBuffer::Single(frame?)),
            None => MissingPixelDataSnafu.fail(),
        }
    } else {
        Ok(PixelBuffer::Sequence(frames))
    }
}

fn decode_encapsulated_frame(obj: &FileDicomObject<InMemDicomObject>, frame: u32) -> Result<Frame> {
    let decoded = obj
        .decode_pixel_data_frame(frame)
        .context(DecodeFrameSnafu { frame })?;
    let image = decoded
        .to_dynamic_image_with_options(0, &ConvertOptions::default().force_8bit())
        .context(ConvertFrameSnafu { frame })?;
    Frame::from_dynamic_image(&image).context(FrameShapeSnafu { frame })
}

/// How the samples of one native frame are arranged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SampleLayout {
    /// One sample per pixel, or color-by-pixel
    Interleaved,
    /// Color-by-plane
    Planar,
    /// Two luma samples followed by one Cb and one Cr sample per pixel pair
    Subsampled422,
}

#[derive(Debug)]
enum Samples {
    Bytes(Vec<u8>),
    Words(Vec<u16>),
}

/// Native (uncompressed) pixel data of all frames.
#[derive(Debug)]
struct NativePixels {
    rows: usize,
    columns: usize,
    color: ColorModel,
    layout: SampleLayout,
    bits_stored: u16,
    signed: bool,
    samples_per_frame: usize,
    samples: Samples,
}

impl NativePixels {
    fn new(
        obj: &InMemDicomObject,
        value: &PrimitiveValue,
        frames: u32,
        transfer_syntax: &str,
    ) -> Result<Self> {
        let rows = attribute::rows(obj).context(AttributeSnafu)?;
        let columns = attribute::cols(obj).context(AttributeSnafu)?;
        let samples_per_pixel = attribute::samples_per_pixel(obj).context(AttributeSnafu)?;
        let bits_allocated = attribute::bits_allocated(obj).context(AttributeSnafu)?;
        let bits_stored = attribute::bits_stored(obj).context(AttributeSnafu)?;
        let signed = attribute::pixel_representation(obj).context(AttributeSnafu)? == 1;
        let pi = attribute::photometric_interpretation(obj).context(AttributeSnafu)?;

        ensure!(
            bits_allocated == 8 || bits_allocated == 16,
            UnsupportedBitsAllocatedSnafu {
                bits: bits_allocated
            }
        );
        ensure!(
            bits_stored > 0 && bits_stored <= bits_allocated,
            UnsupportedBitsStoredSnafu {
                bits: bits_stored,
                allocated: bits_allocated,
            }
        );

        let (color, mut layout) = match pi.as_str() {
            "MONOCHROME1" => (ColorModel::Monochrome1, SampleLayout::Interleaved),
            "MONOCHROME2" => (ColorModel::Monochrome2, SampleLayout::Interleaved),
            "RGB" => (ColorModel::Rgb, SampleLayout::Interleaved),
            "YBR_FULL" => (ColorModel::YbrFull, SampleLayout::Interleaved),
            "YBR_FULL_422" => (ColorModel::YbrFull, SampleLayout::Subsampled422),
            _ => return UnsupportedPhotometricInterpretationSnafu { pi }.fail(),
        };
        ensure!(
            usize::from(samples_per_pixel) == color.samples(),
            UnsupportedSamplesPerPixelSnafu {
                samples: samples_per_pixel,
                pi,
            }
        );

        let stored_samples = match layout {
            SampleLayout::Subsampled422 => {
                ensure!(columns % 2 == 0, OddColumnsSnafu { columns });
                2
            }
            _ if color.is_monochrome() => 1,
            _ => {
                match attribute::planar_configuration(obj).context(AttributeSnafu)? {
                    0 => {}
                    1 => layout = SampleLayout::Planar,
                    value => return UnsupportedPlanarConfigurationSnafu { value }.fail(),
                }
                3
            }
        };

        let bytes_per_sample = usize::from(bits_allocated / 8);
        let too_large = || PixelDataTooLargeSnafu {
            rows,
            columns,
            frames,
        };
        let samples_per_frame = usize::from(rows)
            .checked_mul(usize::from(columns))
            .and_then(|n| n.checked_mul(stored_samples))
            .with_context(too_large)?;
        let total_samples = usize::try_from(frames)
            .ok()
            .and_then(|n| n.checked_mul(samples_per_frame))
            .with_context(too_large)?;
        let expected = total_samples
            .checked_mul(bytes_per_sample)
            .with_context(too_large)?;
        let big_endian = transfer_syntax == uids::EXPLICIT_VR_BIG_ENDIAN;

        let samples = match (bits_allocated, value) {
            (8, PrimitiveValue::U16(words)) => {
                check_length(words.len() * 2, expected)?;
                Samples::Bytes(
                    words
                        .iter()
                        .flat_map(|w| w.to_le_bytes())
                        .take(total_samples)
                        .collect(),
                )
            }
            (8, value) => {
                let bytes = value.to_bytes();
                check_length(bytes.len(), expected)?;
                Samples::Bytes(bytes[..total_samples].to_vec())
            }
            (_, PrimitiveValue::U16(words)) => {
                check_length(words.len() * 2, expected)?;
                Samples::Words(words[..total_samples].to_vec())
            }
            (_, value) => {
                let bytes = value.to_bytes();
                check_length(bytes.len(), expected)?;
                let mut words = vec![0; total_samples];
                if big_endian {
                    BigEndian::read_u16_into(&bytes[..expected], &mut words);
                } else {
                    LittleEndian::read_u16_into(&bytes[..expected], &mut words);
                }
                Samples::Words(words)
            }
        };

        Ok(NativePixels {
            rows: usize::from(rows),
            columns: usize::from(columns),
            color,
            layout,
            bits_stored,
            signed,
            samples_per_frame,
            samples,
        })
    }

    fn frame(&self, index: u32) -> Result<Frame> {
        let start = index as usize * self.samples_per_frame;
        let end = start + self.samples_per_frame;
        let stored: Vec<u8> = match &self.samples {
            Samples::Bytes(bytes) if self.signed => {
                bytes[start..end].iter().map(|v| v ^ 0x80).collect()
            }
            Samples::Bytes(bytes) => bytes[start..end].to_vec(),
            Samples::Words(words) => words[start..end]
                .iter()
                .map(|v| scale_to_u8(*v, self.bits_stored, self.signed))
                .collect(),
        };

        let samples = match self.layout {
            SampleLayout::Interleaved => stored,
            SampleLayout::Planar => {
                let plane = self.rows * self.columns;
                (0..plane)
                    .flat_map(|i| [stored[i], stored[plane + i], stored[2 * plane + i]])
                    .collect()
            }
            SampleLayout::Subsampled422 => stored
                .chunks_exact(4)
                .flat_map(|c| [c[0], c[2], c[3], c[1], c[2], c[3]])
                .collect(),
        };

        Frame::from_interleaved(self.rows, self.columns, self.color, samples)
            .context(FrameShapeSnafu { frame: index })
    }
}

/// Accept the exact length, or one extra byte of padding.
fn check_length(actual: usize, expected: usize) -> Result<()> {
    ensure!(
        matches!(actual.checked_sub(expected), Some(0 | 1)),
        PixelDataLengthSnafu { expected, actual }
    );
    Ok(())
}

/// Scale a stored sample of 9 to 16 bits down to 8 bits,
/// offsetting signed samples so that the minimum maps to 0.
fn scale_to_u8(value: u16, bits_stored: u16, signed: bool) -> u8 {
    let mask = if bits_stored >= 16 {
        u16::MAX
    } else {
        (1 << bits_stored) - 1
    };
    let mut value = value & mask;
    if signed {
        value ^= 1 << (bits_stored - 1);
    }
    (value >> bits_stored.saturating_sub(8)) as u8
}

#[cfg(test)]
mod tests {
    use super::scale_to_u8;

    #[test]
    fn scales_by_bits_stored() {
        assert_eq!(scale_to_u8(0x0FFF, 12, false), 0xFF);
        assert_eq!(scale_to_u8(0x0800, 12, false), 0x80);
        // bits above BitsStored are ignored
        assert_eq!(scale_to_u8(0xF000, 12, false), 0);
        assert_eq!(scale_to_u8(0xFFFF, 16, false), 0xFF);
    }

    #[test]
    fn offsets_signed_samples() {
        // -2048, the minimum of a 12 bit signed sample
        assert_eq!(scale_to_u8(0xF800, 12, true), 0);
        // 0
        assert_eq!(scale_to_u8(0x0000, 12, true), 0x80);
        // 2047
        assert_eq!(scale_to_u8(0x07FF, 12, true), 0xFF);
    }
}
