/// PDU reader module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use bytes::{Buf, BytesMut};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom};
use tracing::warn;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid item length {} (must be >=2)", length))]
    InvalidItemLength { length: u32, backtrace: Backtrace },

    #[snafu(display("Item of {} bytes exceeds the remaining {} bytes", length, remaining))]
    ItemOutOfBounds {
        length: usize,
        remaining: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read {} reserved bytes", bytes))]
    ReadReserved {
        bytes: u32,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("PDU contained an invalid value {:?}", var_item))]
    InvalidPduVariable {
        var_item: PduVariableItem,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid reject source or reason"))]
    InvalidRejectSourceOrReason { backtrace: Backtrace },

    #[snafu(display("Invalid abort source or reason"))]
    InvalidAbortSourceOrReason { backtrace: Backtrace },

    #[snafu(display("Invalid presentation context result reason"))]
    InvalidPresentationContextResultReason { backtrace: Backtrace },

    #[snafu(display("Unknown presentation context sub-item {:#04x}", item_type))]
    UnknownPresentationContextSubItem { item_type: u8, backtrace: Backtrace },

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::DecodeTextError,
    },

    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },

    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read a single PDU from a blocking byte source.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    check_max_pdu_length(max_pdu_length)?;

    // an end of stream right at the start means that no PDU was sent,
    // rather than a truncated one
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduFieldSnafu { field: "type" });
    }

    let pdu_type = bytes[0];
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "length" })?;
    check_pdu_length(pdu_length, max_pdu_length, strict)?;

    let mut body = vec![0; pdu_length as usize];
    reader.read_exact(&mut body).context(ReadPduSnafu)?;

    parse_pdu(pdu_type, &body)
}

/// An incremental PDU reader over bytes received from a stream.
///
/// Bytes are appended to the inner buffer as they arrive,
/// and whole PDUs are split off once complete.
/// Since no bytes are consumed until a full PDU is available,
/// a pending read into [`buffer_mut`](Self::buffer_mut)
/// can be cancelled at any time without losing data.
#[derive(Debug)]
pub struct PduBuffer {
    buffer: BytesMut,
    max_pdu_length: u32,
    strict: bool,
}

impl PduBuffer {
    /// Create a PDU buffer accepting PDUs of up to `max_pdu_length` bytes.
    pub fn new(max_pdu_length: u32, strict: bool) -> Result<Self> {
        check_max_pdu_length(max_pdu_length)?;
        Ok(PduBuffer {
            buffer: BytesMut::with_capacity((max_pdu_length + PDU_HEADER_SIZE) as usize),
            max_pdu_length,
            strict,
        })
    }

    /// Mutable access to the receive buffer,
    /// for reading more bytes into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Whether there are no pending bytes.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Split off the next complete PDU from the buffer.
    ///
    /// Returns `Ok(None)` if more bytes are needed.
    /// The PDU length is checked as soon as the header is available.
    pub fn next_pdu(&mut self) -> Result<Option<Pdu>> {
        if self.buffer.len() < PDU_HEADER_SIZE as usize {
            return Ok(None);
        }
        let pdu_type = self.buffer[0];
        let pdu_length = u32::from_be_bytes([
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
            self.buffer[5],
        ]);
        check_pdu_length(pdu_length, self.max_pdu_length, self.strict)?;

        let total = (PDU_HEADER_SIZE + pdu_length) as usize;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }
        self.buffer.advance(PDU_HEADER_SIZE as usize);
        let body = self.buffer.split_to(pdu_length as usize);
        parse_pdu(pdu_type, &body).map(Some)
    }
}

fn check_max_pdu_length(max_pdu_length: u32) -> Result<()> {
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );
    Ok(())
}

fn check_pdu_length(pdu_length: u32, max_pdu_length: u32, strict: bool) -> Result<()> {
    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        warn!(
            "Incoming pdu was too large: length {}, maximum is {}",
            pdu_length, max_pdu_length
        );
    }
    Ok(())
}

/// Decode the body of a PDU of the given type.
pub fn parse_pdu(pdu_type: u8, body: &[u8]) -> Result<Pdu> {
    let mut cursor = Cursor::new(body);
    let codec = DefaultCharacterSetCodec;

    match pdu_type {
        0x01 => {
            // A-ASSOCIATE-RQ
            let header = read_association_header(&mut cursor, &codec)?;
            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];

            // 75-xxx - application context, presentation contexts, user information
            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextProposed(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationRQ(AssociationRQ {
                protocol_version: header.protocol_version,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                called_ae_title: header.called_ae_title,
                calling_ae_title: header.calling_ae_title,
                presentation_contexts,
                user_variables,
            }))
        }
        0x02 => {
            // A-ASSOCIATE-AC
            let header = read_association_header(&mut cursor, &codec)?;
            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];

            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextResult(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationAC(AssociationAC {
                protocol_version: header.protocol_version,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                called_ae_title: header.called_ae_title,
                calling_ae_title: header.calling_ae_title,
                presentation_contexts,
                user_variables,
            }))
        }
        0x03 => {
            // A-ASSOCIATE-RJ

            // 7 - Reserved
            cursor
                .read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 8 - Result
            let result = AssociationRJResult::from_code(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Result" })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;

            // 9 - Source, 10 - Reason/Diag.
            let source = AssociationRJSource::from_code(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Source" })?,
                cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Reason/Diag.",
                })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;

            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        0x04 => {
            // P-DATA-TF
            let mut values = vec![];
            while has_remaining(&cursor) {
                // 1-4 - Item-length, covering the context ID, the header and the value
                let item_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-Length",
                })?;
                ensure!(
                    item_length >= 2,
                    InvalidItemLengthSnafu {
                        length: item_length
                    }
                );

                // 5 - Presentation-context-ID
                let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;

                // 6 - Message control header:
                // bit 0 set for command, bit 1 set for last fragment
                let header = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Message Control Header",
                })?;
                let value_type = if header & 0x01 > 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = (header & 0x02) > 0;

                let data = read_n(&mut cursor, (item_length - 2) as usize)?;

                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                })
            }

            Ok(Pdu::PData { data: values })
        }
        0x05 => {
            // A-RELEASE-RQ

            // 7-10 - Reserved
            cursor
                .seek(SeekFrom::Current(4))
                .context(ReadReservedSnafu { bytes: 4_u32 })?;

            Ok(Pdu::ReleaseRQ)
        }
        0x06 => {
            // A-RELEASE-RP

            // 7-10 - Reserved
            cursor
                .seek(SeekFrom::Current(4))
                .context(ReadReservedSnafu { bytes: 4_u32 })?;

            Ok(Pdu::ReleaseRP)
        }
        0x07 => {
            // A-ABORT

            // 7-8 - Reserved
            let mut buf = [0u8; 2];
            cursor
                .read_exact(&mut buf)
                .context(ReadReservedSnafu { bytes: 2_u32 })?;

            // 9 - Source, 10 - Reason/Diag
            let source = AbortRQSource::from_code(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Source" })?,
                cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Reason/Diag",
                })?,
            )
            .context(InvalidAbortSourceOrReasonSnafu)?;

            Ok(Pdu::AbortRQ { source })
        }
        _ => Ok(Pdu::Unknown {
            pdu_type,
            data: body.to_vec(),
        }),
    }
}

struct AssociationHeader {
    protocol_version: u16,
    called_ae_title: String,
    calling_ae_title: String,
}

/// Read the fixed fields shared by A-ASSOCIATE-RQ and A-ASSOCIATE-AC.
fn read_association_header(
    cursor: &mut Cursor<&[u8]>,
    codec: &dyn TextCodec,
) -> Result<AssociationHeader> {
    // 7-8 - Protocol-version, only bit 0 is meaningful
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;

    // 9-10 - Reserved
    cursor
        .read_u16::<BigEndian>()
        .context(ReadReservedSnafu { bytes: 2_u32 })?;

    // 11-26 - Called-AE-title
    let called_ae_title = read_ae_title(cursor, codec, "Called-AE-title")?;

    // 27-42 - Calling-AE-title
    let calling_ae_title = read_ae_title(cursor, codec, "Calling-AE-title")?;

    // 43-74 - Reserved
    let mut reserved = [0; 32];
    cursor
        .read_exact(&mut reserved)
        .context(ReadReservedSnafu { bytes: 32_u32 })?;

    Ok(AssociationHeader {
        protocol_version,
        called_ae_title,
        calling_ae_title,
    })
}

fn read_ae_title(
    cursor: &mut Cursor<&[u8]>,
    codec: &dyn TextCodec,
    field: &'static str,
) -> Result<String> {
    let mut ae_bytes = [0; 16];
    cursor
        .read_exact(&mut ae_bytes)
        .context(ReadPduFieldSnafu { field })?;
    Ok(codec
        .decode(&ae_bytes)
        .context(DecodeTextSnafu { field })?
        .trim()
        .to_string())
}

fn has_remaining(cursor: &Cursor<&[u8]>) -> bool {
    cursor.position() < cursor.get_ref().len() as u64
}

fn read_n(cursor: &mut Cursor<&[u8]>, bytes_to_read: usize) -> Result<Vec<u8>> {
    let start = cursor.position() as usize;
    let remaining = cursor.get_ref().len().saturating_sub(start);
    ensure!(
        bytes_to_read <= remaining,
        ItemOutOfBoundsSnafu {
            length: bytes_to_read,
            remaining,
        }
    );
    let data = cursor.get_ref()[start..start + bytes_to_read].to_vec();
    cursor.set_position((start + bytes_to_read) as u64);
    Ok(data)
}

fn read_uid(
    cursor: &mut Cursor<&[u8]>,
    codec: &dyn TextCodec,
    length: usize,
    field: &'static str,
) -> Result<String> {
    let bytes = read_n(cursor, length)?;
    Ok(codec
        .decode(&bytes)
        .context(DecodeTextSnafu { field })?
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string())
}

fn read_pdu_variable(cursor: &mut Cursor<&[u8]>, codec: &dyn TextCodec) -> Result<PduVariableItem> {
    // 1 - Item-type
    let item_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 3-4 - Item-length
    let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;

    let bytes = read_n(cursor, item_length as usize)?;
    let mut cursor = Cursor::new(bytes.as_slice());

    match item_type {
        0x10 => {
            // Application Context Item
            let val = read_uid(&mut cursor, codec, bytes.len(), "Application-context-name")?;
            Ok(PduVariableItem::ApplicationContext(val))
        }
        0x20 => {
            // Presentation Context Item (proposed)
            let mut abstract_syntax: Option<String> = None;
            let mut transfer_syntaxes = vec![];

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            // 6-8 - Reserved
            let mut reserved = [0; 3];
            cursor
                .read_exact(&mut reserved)
                .context(ReadReservedSnafu { bytes: 3_u32 })?;

            // 9-xxx - one abstract syntax and one or more transfer syntaxes
            while has_remaining(&cursor) {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;
                match item_type {
                    0x30 => {
                        abstract_syntax = Some(read_uid(
                            &mut cursor,
                            codec,
                            item_length,
                            "Abstract-syntax-name",
                        )?);
                    }
                    0x40 => {
                        transfer_syntaxes.push(read_uid(
                            &mut cursor,
                            codec,
                            item_length,
                            "Transfer-syntax-name",
                        )?);
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu { item_type }.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id: presentation_context_id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // Presentation Context Item (result)
            let mut transfer_syntax = String::new();

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            // 6 - Reserved
            cursor
                .read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 7 - Result/Reason
            let reason = PresentationContextResultReason::from_code(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Result/Reason" })?,
            )
            .context(InvalidPresentationContextResultReasonSnafu)?;

            // 8 - Reserved
            cursor
                .read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 9-xxx - one transfer syntax sub-item
            while has_remaining(&cursor) {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;
                match item_type {
                    0x40 => {
                        transfer_syntax =
                            read_uid(&mut cursor, codec, item_length, "Transfer-syntax-name")?;
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu { item_type }.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id: presentation_context_id,
                    reason,
                    transfer_syntax,
                },
            ))
        }
        0x50 => {
            // User Information Item
            let mut user_variables = vec![];

            while has_remaining(&cursor) {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;
                match item_type {
                    0x51 => {
                        // Maximum length received
                        let max_length = cursor.read_u32::<BigEndian>().context(
                            ReadPduFieldSnafu {
                                field: "Maximum-length-received",
                            },
                        )?;
                        user_variables.push(UserVariableItem::MaxLength(max_length));
                    }
                    0x52 => {
                        let uid = read_uid(
                            &mut cursor,
                            codec,
                            item_length,
                            "Implementation-class-uid",
                        )?;
                        user_variables.push(UserVariableItem::ImplementationClassUID(uid));
                    }
                    0x55 => {
                        let name = read_uid(
                            &mut cursor,
                            codec,
                            item_length,
                            "Implementation-version-name",
                        )?;
                        user_variables.push(UserVariableItem::ImplementationVersionName(name));
                    }
                    _ => {
                        let data = read_n(&mut cursor, item_length)?;
                        user_variables.push(UserVariableItem::Unknown(item_type, data));
                    }
                }
            }

            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}

/// Read the 4-byte header of a sub-item:
/// item type, reserved byte, and item length.
fn read_sub_item_header(cursor: &mut Cursor<&[u8]>) -> Result<(u8, usize)> {
    let item_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;
    let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;
    Ok((item_type, item_length as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn can_read_release_and_abort() {
        let mut bytes: &[u8] = &[0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
        let pdu = read_pdu(&mut bytes, DEFAULT_MAX_PDU, true).unwrap();
        assert_eq!(pdu, Pdu::ReleaseRQ);

        let mut bytes: &[u8] = &[0x07, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x02, 0x01];
        let pdu = read_pdu(&mut bytes, DEFAULT_MAX_PDU, true).unwrap();
        assert_eq!(
            pdu,
            Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnrecognizedPdu
                )
            }
        );
    }

    #[test]
    fn no_pdu_available_on_empty_source() {
        let mut bytes: &[u8] = &[];
        assert_matches!(
            read_pdu(&mut bytes, DEFAULT_MAX_PDU, true),
            Err(Error::NoPduAvailable { .. })
        );
    }

    #[test]
    fn rejects_pdu_over_the_limit_in_strict_mode() {
        // P-DATA-TF declaring 20000 bytes
        let mut bytes: &[u8] = &[0x04, 0x00, 0x00, 0x00, 0x4E, 0x20];
        assert_matches!(
            read_pdu(&mut bytes, DEFAULT_MAX_PDU, true),
            Err(Error::PduTooLarge { .. })
        );
    }

    #[test]
    fn pdata_item_cannot_overrun_pdu() {
        // item length 0x10 but only 4 bytes follow
        let mut bytes: &[u8] = &[
            0x04, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x10, 0x01, 0x03, 0xAA, 0xBB,
        ];
        assert_matches!(
            read_pdu(&mut bytes, DEFAULT_MAX_PDU, true),
            Err(Error::ItemOutOfBounds { .. })
        );
    }

    #[test]
    fn buffer_waits_for_complete_pdu() {
        let mut buffer = PduBuffer::new(DEFAULT_MAX_PDU, true).unwrap();
        buffer
            .buffer_mut()
            .extend_from_slice(&[0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00]);
        assert_matches!(buffer.next_pdu(), Ok(None));
        buffer
            .buffer_mut()
            .extend_from_slice(&[0x00, 0x00, 0x00, 0x05, 0x00]);
        assert_matches!(buffer.next_pdu(), Ok(Some(Pdu::ReleaseRP)));
        // the start of the next PDU is kept
        assert!(!buffer.is_empty());
        assert_matches!(buffer.next_pdu(), Ok(None));
    }

    #[test]
    fn unknown_pdu_type_is_preserved() {
        let pdu = parse_pdu(0x7F, &[1, 2, 3]).unwrap();
        assert_eq!(
            pdu,
            Pdu::Unknown {
                pdu_type: 0x7F,
                data: vec![1, 2, 3]
            }
        );
    }
}
