use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use dicom_archive_store::{ArchiveLayout, Dataset, InstanceStore};
use dicom_archive_storescp::{ScpConfig, ScpHandle, Status, StorageScp};
use dicom_archive_ul::pdu::{
    write_pdu, AssociationRQ, PDataValue, PDataValueType, Pdu, PduBuffer,
    PresentationContextProposed, PresentationContextResultReason, UserVariableItem,
    APPLICATION_CONTEXT_NAME,
};
use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use matches::assert_matches;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "STORE-SCU";
static SCP_AE_TITLE: &str = "ARCHIVE";
static MADE_UP_TS: &str = "1.2.3.4.5.6.7.8.9";
static STUDY_ROOT_FIND_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.2.2.1";

const SCU_MAX_PDU: u32 = 16_384;

async fn start(root: &std::path::Path, idle_timeout: Option<Duration>) -> Result<ScpHandle> {
    let config = ScpConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ae_title: SCP_AE_TITLE.to_string(),
        idle_timeout,
        archive_root: root.to_path_buf(),
        ..Default::default()
    };
    Ok(StorageScp::start(config).await?)
}

/// A bare bones storage service user.
struct Requestor {
    socket: TcpStream,
    buffer: PduBuffer,
}

impl Requestor {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Requestor {
            socket: TcpStream::connect(addr).await?,
            buffer: PduBuffer::new(SCU_MAX_PDU, false)?,
        })
    }

    async fn send(&mut self, pdu: &Pdu) -> Result<()> {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu)?;
        self.socket.write_all(&bytes).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Pdu>> {
        loop {
            if let Some(pdu) = self.buffer.next_pdu()? {
                return Ok(Some(pdu));
            }
            if self.socket.read_buf(self.buffer.buffer_mut()).await? == 0 {
                return Ok(None);
            }
        }
    }

    async fn request(&mut self, contexts: Vec<(&str, Vec<&str>)>) -> Result<Pdu> {
        let rq = AssociationRQ {
            protocol_version: 1,
            calling_ae_title: SCU_AE_TITLE.to_string(),
            called_ae_title: SCP_AE_TITLE.to_string(),
            application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: contexts
                .into_iter()
                .enumerate()
                .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                    id: (i * 2 + 1) as u8,
                    abstract_syntax: abstract_syntax.to_string(),
                    transfer_syntaxes: transfer_syntaxes.iter().map(|ts| ts.to_string()).collect(),
                })
                .collect(),
            user_variables: vec![UserVariableItem::MaxLength(SCU_MAX_PDU)],
        };
        self.send(&Pdu::AssociationRQ(rq)).await?;
        Ok(self.receive().await?.ok_or("connection closed")?)
    }

    async fn establish(&mut self, contexts: Vec<(&str, Vec<&str>)>) -> Result<()> {
        match self.request(contexts).await? {
            Pdu::AssociationAC(_) => Ok(()),
            pdu => Err(format!("expected A-ASSOCIATE-AC, got {:?}", pdu).into()),
        }
    }

    async fn send_message(&mut self, id: u8, value_type: PDataValueType, data: Vec<u8>) -> Result<()> {
        self.send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: id,
                value_type,
                is_last: true,
                data,
            }],
        })
        .await
    }

    /// Receive a response command set and return its status.
    async fn response_status(&mut self) -> Result<u16> {
        let mut command = Vec::new();
        loop {
            match self.receive().await?.ok_or("connection closed")? {
                Pdu::PData { data } => {
                    for value in data {
                        assert_eq!(value.value_type, PDataValueType::Command);
                        command.extend(value.data);
                        if value.is_last {
                            let obj = InMemDicomObject::read_dataset_with_ts(
                                command.as_slice(),
                                &IMPLICIT_VR_LITTLE_ENDIAN.erased(),
                            )?;
                            return Ok(obj.element(tags::STATUS)?.to_int::<u16>()?);
                        }
                    }
                }
                pdu => return Err(format!("expected P-DATA-TF, got {:?}", pdu).into()),
            }
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.send(&Pdu::ReleaseRQ).await?;
        assert_eq!(self.receive().await?, Some(Pdu::ReleaseRP));
        Ok(())
    }
}

fn encode_command(obj: &InMemDicomObject) -> Vec<u8> {
    let mut data = Vec::new();
    obj.write_dataset_with_ts(&mut data, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .unwrap();
    data
}

fn cecho_rq(message_id: u16) -> Vec<u8> {
    encode_command(&InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, uids::VERIFICATION),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0030])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0101])),
    ]))
}

fn cstore_rq(message_id: u16, sop_class_uid: &str, sop_instance_uid: &str) -> Vec<u8> {
    encode_command(&InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0001])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ]))
}

fn instance(sop_class_uid: &str, sop_instance_uid: &str, ts: &str) -> Dataset {
    let object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class_uid)),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance_uid),
        ),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Doe^John")),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("OT")),
    ]);
    Dataset::from_object(object, ts).unwrap()
}

fn open_store(root: &std::path::Path) -> InstanceStore {
    InstanceStore::open(&ArchiveLayout::new(root)).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_then_release() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), None).await?;

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![(uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])])
        .await?;
    requestor
        .send_message(1, PDataValueType::Command, cecho_rq(1))
        .await?;
    assert_eq!(requestor.response_status().await?, Status::Success.code());
    requestor.release().await?;
    assert_eq!(requestor.receive().await?, None);

    handle.stop(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stored_instance_reads_back_identically() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), None).await?;

    let uid = "1.2.826.0.1.3680043.9.1";
    let dataset = instance(
        uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
        uid,
        uids::EXPLICIT_VR_LITTLE_ENDIAN,
    );

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![(
            uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
            vec![uids::EXPLICIT_VR_LITTLE_ENDIAN],
        )])
        .await?;
    requestor
        .send_message(
            1,
            PDataValueType::Command,
            cstore_rq(1, uids::SECONDARY_CAPTURE_IMAGE_STORAGE, uid),
        )
        .await?;
    requestor
        .send_message(1, PDataValueType::Data, dataset.encoded().to_vec())
        .await?;
    assert_eq!(requestor.response_status().await?, Status::Success.code());
    requestor.release().await?;

    let stored = open_store(root.path()).get(uid)?;
    assert_eq!(stored.encoded(), dataset.encoded());
    assert_eq!(stored.sop_class_uid(), uids::SECONDARY_CAPTURE_IMAGE_STORAGE);
    assert_eq!(stored.transfer_syntax(), uids::EXPLICIT_VR_LITTLE_ENDIAN);

    handle.stop(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn release_before_data_set_stores_nothing() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), None).await?;

    let uid = "1.2.826.0.1.3680043.9.2";
    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![(
            uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
            vec![uids::EXPLICIT_VR_LITTLE_ENDIAN],
        )])
        .await?;
    requestor
        .send_message(
            1,
            PDataValueType::Command,
            cstore_rq(1, uids::SECONDARY_CAPTURE_IMAGE_STORAGE, uid),
        )
        .await?;
    requestor.release().await?;
    assert_eq!(requestor.receive().await?, None);

    let store = open_store(root.path());
    assert!(!store.contains(uid)?);
    assert!(store.list()?.is_empty());

    // the listener keeps serving
    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![(uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])])
        .await?;
    requestor
        .send_message(1, PDataValueType::Command, cecho_rq(2))
        .await?;
    assert_eq!(requestor.response_status().await?, Status::Success.code());
    requestor.release().await?;

    handle.stop(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn accepts_second_transfer_syntax_when_first_unsupported() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), None).await?;

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    let pdu = requestor
        .request(vec![(
            uids::CT_IMAGE_STORAGE,
            vec![MADE_UP_TS, uids::IMPLICIT_VR_LITTLE_ENDIAN],
        )])
        .await?;
    let ac = match pdu {
        Pdu::AssociationAC(ac) => ac,
        pdu => panic!("expected A-ASSOCIATE-AC, got {:?}", pdu),
    };
    assert_eq!(
        ac.presentation_contexts[0].reason,
        PresentationContextResultReason::Acceptance
    );
    assert_eq!(
        ac.presentation_contexts[0].transfer_syntax,
        uids::IMPLICIT_VR_LITTLE_ENDIAN
    );
    requestor.release().await?;

    handle.stop(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejection_leaves_listener_available() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), None).await?;

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    let pdu = requestor
        .request(vec![(
            STUDY_ROOT_FIND_SOP_CLASS,
            vec![uids::IMPLICIT_VR_LITTLE_ENDIAN],
        )])
        .await?;
    assert_matches!(pdu, Pdu::AssociationRJ(_));
    assert_eq!(requestor.receive().await?, None);

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![(uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])])
        .await?;
    requestor
        .send_message(1, PDataValueType::Command, cecho_rq(2))
        .await?;
    assert_eq!(requestor.response_status().await?, Status::Success.code());
    requestor.release().await?;

    handle.stop(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_stores_keep_association_established() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), None).await?;

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![
            (uids::CT_IMAGE_STORAGE, vec![uids::EXPLICIT_VR_LITTLE_ENDIAN]),
            (
                uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
                vec![uids::EXPLICIT_VR_LITTLE_ENDIAN],
            ),
        ])
        .await?;

    // SOP class of the command differs from the context's abstract syntax
    let dataset = instance(
        uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
        "1.2.3.100",
        uids::EXPLICIT_VR_LITTLE_ENDIAN,
    );
    requestor
        .send_message(
            1,
            PDataValueType::Command,
            cstore_rq(1, uids::SECONDARY_CAPTURE_IMAGE_STORAGE, "1.2.3.100"),
        )
        .await?;
    requestor
        .send_message(1, PDataValueType::Data, dataset.encoded().to_vec())
        .await?;
    assert_eq!(
        requestor.response_status().await?,
        Status::SopClassNotSupported.code()
    );

    // truncated data set
    let garbage = vec![0x10, 0x00, 0x10, 0x00, b'P', b'N', 100, 0, b'a', b'b', b'c', b'd'];
    requestor
        .send_message(
            3,
            PDataValueType::Command,
            cstore_rq(2, uids::SECONDARY_CAPTURE_IMAGE_STORAGE, "1.2.3.101"),
        )
        .await?;
    requestor
        .send_message(3, PDataValueType::Data, garbage)
        .await?;
    assert_eq!(
        requestor.response_status().await?,
        Status::CannotUnderstand.code()
    );

    // data set instance differs from the command
    let dataset = instance(
        uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
        "1.2.3.102",
        uids::EXPLICIT_VR_LITTLE_ENDIAN,
    );
    requestor
        .send_message(
            3,
            PDataValueType::Command,
            cstore_rq(3, uids::SECONDARY_CAPTURE_IMAGE_STORAGE, "1.2.3.103"),
        )
        .await?;
    requestor
        .send_message(3, PDataValueType::Data, dataset.encoded().to_vec())
        .await?;
    assert_eq!(
        requestor.response_status().await?,
        Status::DataSetMismatch.code()
    );

    // and a valid one still goes through
    let dataset = instance(
        uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
        "1.2.3.104",
        uids::EXPLICIT_VR_LITTLE_ENDIAN,
    );
    requestor
        .send_message(
            3,
            PDataValueType::Command,
            cstore_rq(4, uids::SECONDARY_CAPTURE_IMAGE_STORAGE, "1.2.3.104"),
        )
        .await?;
    requestor
        .send_message(3, PDataValueType::Data, dataset.encoded().to_vec())
        .await?;
    assert_eq!(requestor.response_status().await?, Status::Success.code());
    requestor.release().await?;

    let store = open_store(root.path());
    assert_eq!(store.list()?, vec!["1.2.3.104".to_string()]);

    handle.stop(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_association_is_aborted() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), Some(Duration::from_millis(200))).await?;

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![(uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])])
        .await?;
    assert_eq!(handle.active_associations(), 1);

    let pdu = tokio::time::timeout(Duration::from_secs(5), requestor.receive()).await??;
    assert_matches!(pdu, Some(Pdu::AbortRQ { .. }));
    assert_eq!(requestor.receive().await?, None);

    // the worker ends soon after
    let mut remaining = handle.active_associations();
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = handle.active_associations();
    }
    assert_eq!(remaining, 0);

    handle.stop(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_stop_releases_idle_associations() -> Result<()> {
    let root = tempfile::tempdir()?;
    let handle = start(root.path(), None).await?;

    let mut requestor = Requestor::connect(handle.local_addr()).await?;
    requestor
        .establish(vec![(uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])])
        .await?;

    let stopping = tokio::spawn(handle.stop(Duration::from_secs(5)));

    assert_eq!(requestor.receive().await?, Some(Pdu::ReleaseRQ));
    requestor.send(&Pdu::ReleaseRP).await?;
    assert_eq!(requestor.receive().await?, None);

    stopping.await??;
    Ok(())
}
