use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not write PDU of type {:#04x}", pdu_type))]
    WritePdu {
        pdu_type: u8,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not encode field `{}`", field))]
    EncodeField {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::EncodeTextError,
    },

    #[snafu(display("Field `{}` is too long ({} bytes)", field, length))]
    FieldTooLong {
        field: &'static str,
        length: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Write a sub-item with a 2-byte length prefix:
/// item type, reserved byte, item length, then the item data.
fn write_item_u16<F>(out: &mut Vec<u8>, item_type: u8, field: &'static str, func: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data)?;
    ensure!(
        data.len() <= u16::MAX as usize,
        FieldTooLongSnafu {
            field,
            length: data.len()
        }
    );

    out.push(item_type);
    out.push(0x00);
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(&data);
    Ok(())
}

fn write_text(out: &mut Vec<u8>, text: &str, field: &'static str) -> Result<()> {
    let bytes = DefaultCharacterSetCodec
        .encode(text)
        .context(EncodeFieldSnafu { field })?;
    out.extend_from_slice(&bytes);
    Ok(())
}

/// Write an AE title as a 16-byte field padded with trailing spaces.
fn write_ae_title(out: &mut Vec<u8>, ae_title: &str, field: &'static str) -> Result<()> {
    let mut bytes = DefaultCharacterSetCodec
        .encode(ae_title.trim())
        .context(EncodeFieldSnafu { field })?;
    ensure!(
        bytes.len() <= 16,
        FieldTooLongSnafu {
            field,
            length: bytes.len()
        }
    );
    bytes.resize(16, b' ');
    out.extend_from_slice(&bytes);
    Ok(())
}

fn write_association_body(
    out: &mut Vec<u8>,
    protocol_version: u16,
    called_ae_title: &str,
    calling_ae_title: &str,
    application_context_name: &str,
    user_variables: &[UserVariableItem],
    presentation_contexts: impl FnOnce(&mut Vec<u8>) -> Result<()>,
) -> Result<()> {
    // 7-8 - Protocol-version
    out.extend_from_slice(&protocol_version.to_be_bytes());
    // 9-10 - Reserved
    out.extend_from_slice(&[0; 2]);
    // 11-26 - Called-AE-title
    write_ae_title(out, called_ae_title, "Called-AE-title")?;
    // 27-42 - Calling-AE-title
    write_ae_title(out, calling_ae_title, "Calling-AE-title")?;
    // 43-74 - Reserved
    out.extend_from_slice(&[0; 32]);

    // 75-xxx - Variable items
    write_item_u16(out, 0x10, "Application Context Item", |data| {
        write_text(data, application_context_name, "Application-context-name")
    })?;
    presentation_contexts(out)?;
    write_item_u16(out, 0x50, "User Information Item", |data| {
        write_user_variables(data, user_variables)
    })
}

fn write_user_variables(out: &mut Vec<u8>, user_variables: &[UserVariableItem]) -> Result<()> {
    for user_variable in user_variables {
        match user_variable {
            UserVariableItem::MaxLength(max_length) => {
                write_item_u16(out, 0x51, "Maximum Length Sub-Item", |data| {
                    data.extend_from_slice(&max_length.to_be_bytes());
                    Ok(())
                })?;
            }
            UserVariableItem::ImplementationClassUID(uid) => {
                write_item_u16(out, 0x52, "Implementation Class UID Sub-Item", |data| {
                    write_text(data, uid, "Implementation-class-uid")
                })?;
            }
            UserVariableItem::ImplementationVersionName(name) => {
                write_item_u16(out, 0x55, "Implementation Version Name Sub-Item", |data| {
                    write_text(data, name, "Implementation-version-name")
                })?;
            }
            UserVariableItem::Unknown(item_type, bytes) => {
                write_item_u16(out, *item_type, "Unknown Sub-Item", |data| {
                    data.extend_from_slice(bytes);
                    Ok(())
                })?;
            }
        }
    }
    Ok(())
}

/// Encode the variable part of a PDU, returning its type code and body.
fn encode_pdu_body(pdu: &Pdu) -> Result<(u8, Vec<u8>)> {
    let mut body = vec![];
    let pdu_type = match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_association_body(
                &mut body,
                *protocol_version,
                called_ae_title,
                calling_ae_title,
                application_context_name,
                user_variables,
                |out| {
                    for pc in presentation_contexts {
                        write_item_u16(out, 0x20, "Presentation Context Item", |data| {
                            // 5 - Presentation-context-ID, 6-8 - Reserved
                            data.extend_from_slice(&[pc.id, 0, 0, 0]);
                            write_item_u16(data, 0x30, "Abstract Syntax Sub-Item", |data| {
                                write_text(data, &pc.abstract_syntax, "Abstract-syntax-name")
                            })?;
                            for ts in &pc.transfer_syntaxes {
                                write_item_u16(data, 0x40, "Transfer Syntax Sub-Item", |data| {
                                    write_text(data, ts, "Transfer-syntax-name")
                                })?;
                            }
                            Ok(())
                        })?;
                    }
                    Ok(())
                },
            )?;
            0x01
        }
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_association_body(
                &mut body,
                *protocol_version,
                called_ae_title,
                calling_ae_title,
                application_context_name,
                user_variables,
                |out| {
                    for pc in presentation_contexts {
                        write_item_u16(out, 0x21, "Presentation Context Item", |data| {
                            // 5 - Presentation-context-ID, 6 - Reserved,
                            // 7 - Result/Reason, 8 - Reserved
                            data.extend_from_slice(&[pc.id, 0, pc.reason as u8, 0]);
                            write_item_u16(data, 0x40, "Transfer Syntax Sub-Item", |data| {
                                write_text(data, &pc.transfer_syntax, "Transfer-syntax-name")
                            })
                        })?;
                    }
                    Ok(())
                },
            )?;
            0x02
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            let (source, reason) = source.codes();
            // 7 - Reserved, 8 - Result, 9 - Source, 10 - Reason/Diag.
            body.extend_from_slice(&[0x00, *result as u8, source, reason]);
            0x03
        }
        Pdu::PData { data } => {
            for value in data {
                // 1-4 - Item-length
                body.write_u32::<BigEndian>(value.data.len() as u32 + 2)
                    .context(WritePduSnafu { pdu_type: 0x04_u8 })?;
                // 5 - Presentation-context-ID
                body.push(value.presentation_context_id);
                // 6 - Message control header
                let mut header = 0x00;
                if value.value_type == PDataValueType::Command {
                    header |= 0x01;
                }
                if value.is_last {
                    header |= 0x02;
                }
                body.push(header);
                body.extend_from_slice(&value.data);
            }
            0x04
        }
        Pdu::ReleaseRQ => {
            body.extend_from_slice(&[0; 4]);
            0x05
        }
        Pdu::ReleaseRP => {
            body.extend_from_slice(&[0; 4]);
            0x06
        }
        Pdu::AbortRQ { source } => {
            let (source, reason) = source.codes();
            // 7-8 - Reserved, 9 - Source, 10 - Reason/Diag
            body.extend_from_slice(&[0x00, 0x00, source, reason]);
            0x07
        }
        Pdu::Unknown { pdu_type, data } => {
            body.extend_from_slice(data);
            *pdu_type
        }
    };
    Ok((pdu_type, body))
}

/// Write a full PDU, header included.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    let (pdu_type, body) = encode_pdu_body(pdu)?;
    // 1 - PDU-type, 2 - Reserved, 3-6 - PDU-length
    writer
        .write_u8(pdu_type)
        .and_then(|_| writer.write_u8(0x00))
        .and_then(|_| writer.write_u32::<BigEndian>(body.len() as u32))
        .and_then(|_| writer.write_all(&body))
        .context(WritePduSnafu { pdu_type })
}
