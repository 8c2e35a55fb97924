//! Data sets carried by C-STORE requests.
//!
//! A [`Dataset`] keeps three views of the same instance:
//! the file meta group describing its encoding,
//! the decoded attributes,
//! and the data set bytes exactly as they were received.
//! The encoded bytes are what gets persisted,
//! so that a stored instance reads back byte for byte.
use dicom_dictionary_std::tags;
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::{FileDicomObject, FileMetaTable, FileMetaTableBuilder, InMemDicomObject};
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Unsupported transfer syntax {}", uid))]
    UnsupportedTransferSyntax { uid: String, backtrace: Backtrace },

    #[snafu(display("Could not decode data set"))]
    DecodeDataset {
        #[snafu(backtrace)]
        source: dicom_object::ReadError,
    },

    #[snafu(display("Could not encode data set"))]
    EncodeDataset {
        #[snafu(backtrace)]
        source: dicom_object::WriteError,
    },

    #[snafu(display("Could not build file meta group"))]
    BuildMeta {
        #[snafu(backtrace)]
        source: dicom_object::meta::Error,
    },

    #[snafu(display("Missing attribute {}", name))]
    MissingAttribute {
        name: &'static str,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A decoded DICOM data set together with its file meta information.
#[derive(Debug, Clone)]
pub struct Dataset {
    meta: FileMetaTable,
    object: InMemDicomObject,
    encoded: Vec<u8>,
}

impl Dataset {
    /// Decode a data set from its encoded bytes,
    /// using the transfer syntax declared in `meta`.
    pub fn from_encoded(meta: FileMetaTable, encoded: Vec<u8>) -> Result<Self> {
        let ts_uid = meta.transfer_syntax();
        let ts = TransferSyntaxRegistry
            .get(ts_uid)
            .filter(|ts| !ts.is_unsupported())
            .context(UnsupportedTransferSyntaxSnafu { uid: ts_uid })?;
        let object =
            InMemDicomObject::read_dataset_with_ts(encoded.as_slice(), ts).context(DecodeDatasetSnafu)?;
        Ok(Dataset {
            meta,
            object,
            encoded,
        })
    }

    /// Encode an in-memory object with the given transfer syntax,
    /// building its file meta group from the object's SOP class and instance.
    pub fn from_object(object: InMemDicomObject, transfer_syntax: &str) -> Result<Self> {
        let ts = TransferSyntaxRegistry
            .get(transfer_syntax)
            .filter(|ts| !ts.is_unsupported())
            .context(UnsupportedTransferSyntaxSnafu {
                uid: transfer_syntax,
            })?;
        let sop_class_uid =
            string_attribute(&object, tags::SOP_CLASS_UID).context(MissingAttributeSnafu {
                name: "SOPClassUID",
            })?;
        let sop_instance_uid =
            string_attribute(&object, tags::SOP_INSTANCE_UID).context(MissingAttributeSnafu {
                name: "SOPInstanceUID",
            })?;
        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(sop_class_uid)
            .media_storage_sop_instance_uid(sop_instance_uid)
            .transfer_syntax(ts.uid())
            .build()
            .context(BuildMetaSnafu)?;

        let mut encoded = Vec::new();
        object
            .write_dataset_with_ts(&mut encoded, ts)
            .context(EncodeDatasetSnafu)?;
        Ok(Dataset {
            meta,
            object,
            encoded,
        })
    }

    pub fn meta(&self) -> &FileMetaTable {
        &self.meta
    }

    pub fn object(&self) -> &InMemDicomObject {
        &self.object
    }

    /// The data set bytes, in the transfer syntax of the file meta group.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn transfer_syntax(&self) -> &str {
        self.meta.transfer_syntax()
    }

    /// The SOP Class UID according to the file meta group.
    pub fn sop_class_uid(&self) -> &str {
        self.meta.media_storage_sop_class_uid()
    }

    /// The SOP Instance UID according to the file meta group.
    ///
    /// This is the key under which the instance is stored.
    pub fn sop_instance_uid(&self) -> &str {
        self.meta.media_storage_sop_instance_uid()
    }

    /// The SOP Class UID recorded in the data set itself, if any.
    pub fn declared_sop_class_uid(&self) -> Option<String> {
        string_attribute(&self.object, tags::SOP_CLASS_UID)
    }

    /// The SOP Instance UID recorded in the data set itself, if any.
    pub fn declared_sop_instance_uid(&self) -> Option<String> {
        string_attribute(&self.object, tags::SOP_INSTANCE_UID)
    }

    /// Combine the attributes and the file meta group into a file object,
    /// as expected by pixel data decoders.
    pub fn to_file_object(&self) -> FileDicomObject<InMemDicomObject> {
        self.object.clone().with_exact_meta(self.meta.clone())
    }

    pub fn into_parts(self) -> (FileMetaTable, InMemDicomObject, Vec<u8>) {
        (self.meta, self.object, self.encoded)
    }
}

fn string_attribute(object: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    let value = object.get(tag)?.to_str().ok()?;
    let value = value.trim_end_matches(|c: char| c == '\0' || c == ' ');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
