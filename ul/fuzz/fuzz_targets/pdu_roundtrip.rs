#![no_main]
use std::error::Error;

use dicom_archive_ul::pdu::{read_pdu, write_pdu, PduBuffer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, bool, &[u8])| {
    let (maxlen, strict, data) = data;
    let _ = fuzz(maxlen, strict, data);
});

fn fuzz(maxlen: u32, strict: bool, data: &[u8]) -> Result<(), Box<dyn Error>> {
    // the blocking reader and the incremental buffer must agree
    let pdu = read_pdu(&mut &data[..], maxlen, strict)?;
    let mut buffer = PduBuffer::new(maxlen, strict)?;
    buffer.buffer_mut().extend_from_slice(data);
    let buffered = buffer
        .next_pdu()?
        .expect("a complete PDU should be available in the buffer");
    assert_eq!(pdu, buffered);

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu)?;

    let pdu2 = read_pdu(&mut bytes.as_slice(), maxlen, strict)
        .expect("serialized pdu should always deserialize");
    assert_eq!(
        pdu, pdu2,
        "pdu should be equal after serializing to/from bytes"
    );

    Ok(())
}
