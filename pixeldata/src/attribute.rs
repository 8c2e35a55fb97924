//! Utility module for fetching key image attributes from a data set.

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum GetAttributeError {
    #[snafu(display("Missing required attribute `{}`", name))]
    MissingRequiredField {
        name: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not convert attribute `{}`", name))]
    ConvertValue {
        name: &'static str,
        source: dicom_core::value::ConvertValueError,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = GetAttributeError> = std::result::Result<T, E>;

/// Get the Columns from the data set
pub fn cols(obj: &InMemDicomObject) -> Result<u16> {
    retrieve_required_u16(obj, tags::COLUMNS, "Columns")
}

/// Get the Rows from the data set
pub fn rows(obj: &InMemDicomObject) -> Result<u16> {
    retrieve_required_u16(obj, tags::ROWS, "Rows")
}

/// Get the SamplesPerPixel from the data set
pub fn samples_per_pixel(obj: &InMemDicomObject) -> Result<u16> {
    retrieve_required_u16(obj, tags::SAMPLES_PER_PIXEL, "SamplesPerPixel")
}

/// Get the BitsAllocated from the data set
pub fn bits_allocated(obj: &InMemDicomObject) -> Result<u16> {
    retrieve_required_u16(obj, tags::BITS_ALLOCATED, "BitsAllocated")
}

/// Get the BitsStored from the data set, defaulting to BitsAllocated
pub fn bits_stored(obj: &InMemDicomObject) -> Result<u16> {
    match retrieve_optional_u16(obj, tags::BITS_STORED, "BitsStored")? {
        Some(bits) => Ok(bits),
        None => bits_allocated(obj),
    }
}

/// Get the PixelRepresentation from the data set, returning 0 by default
pub fn pixel_representation(obj: &InMemDicomObject) -> Result<u16> {
    Ok(retrieve_optional_u16(obj, tags::PIXEL_REPRESENTATION, "PixelRepresentation")?.unwrap_or(0))
}

/// Get the PlanarConfiguration from the data set, returning 0 by default
pub fn planar_configuration(obj: &InMemDicomObject) -> Result<u16> {
    Ok(retrieve_optional_u16(obj, tags::PLANAR_CONFIGURATION, "PlanarConfiguration")?.unwrap_or(0))
}

/// Get the PhotometricInterpretation from the data set
pub fn photometric_interpretation(obj: &InMemDicomObject) -> Result<String> {
    let value = obj
        .get(tags::PHOTOMETRIC_INTERPRETATION)
        .and_then(|e| e.to_str().ok())
        .context(MissingRequiredFieldSnafu {
            name: "PhotometricInterpretation",
        })?;
    Ok(value.trim_end_matches(['\0', ' ']).to_string())
}

/// Get the NumberOfFrames from the data set, returning 1 by default
pub fn number_of_frames(obj: &InMemDicomObject) -> Result<u32> {
    match obj.get(tags::NUMBER_OF_FRAMES) {
        Some(e) => e.to_int().context(ConvertValueSnafu {
            name: "NumberOfFrames",
        }),
        None => Ok(1),
    }
}

fn retrieve_required_u16(obj: &InMemDicomObject, tag: Tag, name: &'static str) -> Result<u16> {
    retrieve_optional_u16(obj, tag, name)?.context(MissingRequiredFieldSnafu { name })
}

fn retrieve_optional_u16(
    obj: &InMemDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<Option<u16>> {
    obj.get(tag)
        .map(|e| e.to_int().context(ConvertValueSnafu { name }))
        .transpose()
}
