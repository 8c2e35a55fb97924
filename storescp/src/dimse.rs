//! DIMSE command sets.
//!
//! Command sets are always encoded in implicit VR little endian,
//! regardless of the transfer syntax negotiated for the data sets.
use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::tags;
use dicom_object::{InMemDicomObject, StandardDataDictionary};
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};

/// Command field of a C-STORE request
pub const C_STORE_RQ: u16 = 0x0001;
/// Command field of a C-STORE response
pub const C_STORE_RSP: u16 = 0x8001;
/// Command field of a C-ECHO request
pub const C_ECHO_RQ: u16 = 0x0030;
/// Command field of a C-ECHO response
pub const C_ECHO_RSP: u16 = 0x8030;

/// Command data set type value meaning that no data set follows
pub const DATA_SET_ABSENT: u16 = 0x0101;

/// High bit of the command field, set in all responses
const RESPONSE_BIT: u16 = 0x8000;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not decode command set"))]
    DecodeCommand {
        #[snafu(backtrace)]
        source: dicom_object::ReadError,
    },

    #[snafu(display("Could not encode command set"))]
    EncodeCommand {
        #[snafu(backtrace)]
        source: dicom_object::WriteError,
    },

    #[snafu(display("Command set is missing {}", name))]
    MissingCommandElement {
        name: &'static str,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A DIMSE status, as sent back in response command sets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// The operation completed
    Success,
    /// No accepted presentation context covers the SOP class
    SopClassNotSupported,
    /// The command names an operation not provided here
    UnrecognizedOperation,
    /// The data set does not match the SOP class or instance of the command
    DataSetMismatch,
    /// The data set could not be decoded
    CannotUnderstand,
    /// The data set is not encoded in the negotiated transfer syntax
    TransferSyntaxNotSupported,
    /// The instance could not be persisted
    OutOfResources,
}

impl Status {
    /// The status code transmitted in the Status element.
    pub fn code(self) -> u16 {
        match self {
            Status::Success => 0x0000,
            Status::SopClassNotSupported => 0x0122,
            Status::UnrecognizedOperation => 0x0211,
            Status::DataSetMismatch => 0xA900,
            Status::CannotUnderstand => 0xC000,
            Status::TransferSyntaxNotSupported => 0xC001,
            Status::OutOfResources => 0xA700,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        [
            Status::Success,
            Status::SopClassNotSupported,
            Status::UnrecognizedOperation,
            Status::DataSetMismatch,
            Status::CannotUnderstand,
            Status::TransferSyntaxNotSupported,
            Status::OutOfResources,
        ]
        .into_iter()
        .find(|status| status.code() == code)
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({:#06x})", self, self.code())
    }
}

/// The fields of a request command set needed for dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_field: u16,
    pub message_id: u16,
    pub affected_sop_class_uid: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub has_data_set: bool,
}

impl Command {
    /// Decode a request command set from its implicit VR little endian encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let obj = InMemDicomObject::read_dataset_with_ts(bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .context(DecodeCommandSnafu)?;

        let command_field = obj
            .get(tags::COMMAND_FIELD)
            .and_then(|e| e.to_int::<u16>().ok())
            .context(MissingCommandElementSnafu {
                name: "Command Field",
            })?;
        let message_id = obj
            .get(tags::MESSAGE_ID)
            .and_then(|e| e.to_int::<u16>().ok())
            .context(MissingCommandElementSnafu { name: "Message ID" })?;
        let has_data_set = obj
            .get(tags::COMMAND_DATA_SET_TYPE)
            .and_then(|e| e.to_int::<u16>().ok())
            .context(MissingCommandElementSnafu {
                name: "Command Data Set Type",
            })?
            != DATA_SET_ABSENT;

        Ok(Command {
            command_field,
            message_id,
            affected_sop_class_uid: uid_element(&obj, tags::AFFECTED_SOP_CLASS_UID),
            affected_sop_instance_uid: uid_element(&obj, tags::AFFECTED_SOP_INSTANCE_UID),
            has_data_set,
        })
    }
}

fn uid_element(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    let value = obj.get(tag)?.to_str().ok()?;
    let value = value.trim_end_matches(['\0', ' ']);
    (!value.is_empty()).then(|| value.to_string())
}

/// Encode a command set in implicit VR little endian.
pub fn encode_command(obj: &InMemDicomObject<StandardDataDictionary>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    obj.write_dataset_with_ts(&mut data, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .context(EncodeCommandSnafu)?;
    Ok(data)
}

pub fn create_cstore_response(
    message_id: u16,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    status: Status,
) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_STORE_RSP])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [DATA_SET_ABSENT]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status.code()])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ])
}

pub fn create_cecho_response(
    message_id: u16,
    status: Status,
) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, crate::transfer::VERIFICATION_SOP_CLASS),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_ECHO_RSP])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [DATA_SET_ABSENT]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status.code()])),
    ])
}

/// A response to a command that this service does not provide.
pub fn create_unrecognized_response(
    command_field: u16,
    message_id: u16,
) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [command_field | RESPONSE_BIT]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [DATA_SET_ABSENT]),
        ),
        DataElement::new(
            tags::STATUS,
            VR::US,
            dicom_value!(U16, [Status::UnrecognizedOperation.code()]),
        ),
    ])
}
