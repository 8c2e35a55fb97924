#![allow(dead_code)]

use dicom_archive_store::Dataset;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::InMemDicomObject;

/// Attributes of a native test image.
pub struct Image {
    pub rows: u16,
    pub columns: u16,
    pub photometric_interpretation: &'static str,
    pub bits: u16,
    pub planar_configuration: Option<u16>,
    pub number_of_frames: Option<u32>,
}

impl Image {
    pub fn rgb(rows: u16, columns: u16) -> Self {
        Image {
            rows,
            columns,
            photometric_interpretation: "RGB",
            bits: 8,
            planar_configuration: Some(0),
            number_of_frames: None,
        }
    }

    pub fn gray(rows: u16, columns: u16) -> Self {
        Image {
            rows,
            columns,
            photometric_interpretation: "MONOCHROME2",
            bits: 8,
            planar_configuration: None,
            number_of_frames: None,
        }
    }

    pub fn frames(mut self, frames: u32) -> Self {
        self.number_of_frames = Some(frames);
        self
    }

    pub fn samples_per_pixel(&self) -> u16 {
        if self.photometric_interpretation.starts_with("MONOCHROME") {
            1
        } else {
            3
        }
    }

    /// Build a data set with the given pixel data bytes.
    pub fn dataset(&self, id: &str, pixel_data: Vec<u8>) -> Dataset {
        let mut obj = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(uids::SECONDARY_CAPTURE_IMAGE_STORAGE),
            ),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(id)),
            DataElement::new(
                tags::SAMPLES_PER_PIXEL,
                VR::US,
                PrimitiveValue::from(self.samples_per_pixel()),
            ),
            DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from(self.photometric_interpretation),
            ),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(self.rows)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(self.columns)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(self.bits)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(self.bits)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(self.bits - 1)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::from(pixel_data)),
        ]);
        if let Some(planar) = self.planar_configuration {
            obj.put(DataElement::new(
                tags::PLANAR_CONFIGURATION,
                VR::US,
                PrimitiveValue::from(planar),
            ));
        }
        if let Some(frames) = self.number_of_frames {
            obj.put(DataElement::new(
                tags::NUMBER_OF_FRAMES,
                VR::IS,
                PrimitiveValue::from(frames.to_string()),
            ));
        }
        Dataset::from_object(obj, uids::EXPLICIT_VR_LITTLE_ENDIAN).unwrap()
    }

    /// The number of pixel data bytes of one frame.
    pub fn frame_len(&self) -> usize {
        usize::from(self.rows)
            * usize::from(self.columns)
            * usize::from(self.samples_per_pixel())
            * usize::from(self.bits / 8)
    }
}
