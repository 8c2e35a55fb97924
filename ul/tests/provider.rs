use std::net::SocketAddr;
use std::time::Duration;

use dicom_archive_ul::association::negotiation::AcceptorOptions;
use dicom_archive_ul::association::{AssociationState, Error};
use dicom_archive_ul::pdu::{
    write_pdu, AbortRQServiceProviderReason, AbortRQSource, AssociationRQ, PDataValue,
    PDataValueType, Pdu, PduBuffer, PresentationContextProposed, PresentationContextResultReason,
    UserVariableItem, APPLICATION_CONTEXT_NAME,
};
use dicom_archive_ul::{Event, ProviderAssociation};
use matches::assert_matches;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "STORE-SCU";
static SCP_AE_TITLE: &str = "ARCHIVE";

static IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
static EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
static MADE_UP_TS: &str = "1.2.3.4.5.6.7.8.9";
static VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";
static CT_IMAGE_STORAGE_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.2";
static STUDY_ROOT_FIND_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.2.2.1";

const SCU_MAX_PDU: u32 = 4_096;

fn acceptor() -> AcceptorOptions {
    AcceptorOptions::new()
        .ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .with_abstract_syntax(CT_IMAGE_STORAGE_SOP_CLASS)
        .with_transfer_syntax(EXPLICIT_VR_LE)
        .with_transfer_syntax(IMPLICIT_VR_LE)
}

async fn spawn_provider<F, Fut, T>(
    options: AcceptorOptions,
    then: F,
) -> Result<(JoinHandle<T>, SocketAddr)>
where
    F: FnOnce(dicom_archive_ul::association::Result<ProviderAssociation<TcpStream>>) -> Fut
        + Send
        + 'static,
    Fut: std::future::Future<Output = T> + Send,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept failed");
        let association = ProviderAssociation::accept(socket, &options).await;
        then(association).await
    });
    Ok((handle, addr))
}

/// A bare bones association requestor.
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
}

fn fragment(id: u8, value_type: PDataValueType, is_last: bool, data: &[u8]) -> Pdu {
    Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: id,
            value_type,
            is_last,
            data: data.to_vec(),
        }],
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn negotiates_second_transfer_syntax_when_first_unsupported() -> Result<()> {
    let (handle, addr) = spawn_provider(acceptor(), |association| async move {
        let association = association.expect("association should be established");
        association.presentation_contexts().to_vec()
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    let pdu = requestor
        .request(vec![(CT_IMAGE_STORAGE_SOP_CLASS, vec![MADE_UP_TS, EXPLICIT_VR_LE])])
        .await?;
    let ac = match pdu {
        Pdu::AssociationAC(ac) => ac,
        pdu => panic!("expected A-ASSOCIATE-AC, got {pdu:?}"),
    };
    assert_eq!(ac.presentation_contexts.len(), 1);
    assert_eq!(
        ac.presentation_contexts[0].reason,
        PresentationContextResultReason::Acceptance
    );
    assert_eq!(ac.presentation_contexts[0].transfer_syntax, EXPLICIT_VR_LE);
    assert_eq!(ac.called_ae_title, SCP_AE_TITLE);
    assert_eq!(ac.calling_ae_title, SCU_AE_TITLE);

    let contexts = handle.await?;
    assert_eq!(contexts[0].transfer_syntax.as_deref(), Some(EXPLICIT_VR_LE));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_association_with_only_unsupported_abstract_syntaxes() -> Result<()> {
    let (handle, addr) = spawn_provider(acceptor(), |association| async move {
        association.map(|_| ())
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    let pdu = requestor
        .request(vec![(STUDY_ROOT_FIND_SOP_CLASS, vec![IMPLICIT_VR_LE])])
        .await?;
    assert_matches!(pdu, Pdu::AssociationRJ(_));
    // transport closed afterwards
    assert_eq!(requestor.receive().await?, None);

    assert_matches!(handle.await?, Err(Error::Rejected { .. }));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reassembles_fragments_and_fragments_replies() -> Result<()> {
    let (handle, addr) = spawn_provider(acceptor(), |association| async move {
        let mut association = association.expect("association should be established");
        let command = association.next_event().await.expect("command");
        let data = association.next_event().await.expect("data");
        // three times the requestor max PDU length
        let reply = vec![0x42; 3 * SCU_MAX_PDU as usize];
        association
            .send_message(1, PDataValueType::Data, &reply)
            .await
            .expect("send reply");
        let last = association.next_event().await.expect("release");
        (command, data, last, association.state())
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    requestor
        .request(vec![(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])])
        .await?;

    requestor
        .send(&fragment(1, PDataValueType::Command, false, &[1, 2]))
        .await?;
    requestor
        .send(&fragment(1, PDataValueType::Command, true, &[3]))
        .await?;
    // data set in a single fragment
    requestor
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: true,
                data: vec![9; 10],
            }],
        })
        .await?;

    let mut received = Vec::new();
    loop {
        match requestor.receive().await?.ok_or("connection closed")? {
            Pdu::PData { data } => {
                for value in data {
                    assert!(value.data.len() <= (SCU_MAX_PDU - 6) as usize);
                    received.extend_from_slice(&value.data);
                    if value.is_last {
                        break;
                    }
                }
                if received.len() == 3 * SCU_MAX_PDU as usize {
                    break;
                }
            }
            pdu => panic!("unexpected PDU {pdu:?}"),
        }
    }
    assert_eq!(received.len(), 3 * SCU_MAX_PDU as usize);

    requestor.send(&Pdu::ReleaseRQ).await?;
    assert_eq!(requestor.receive().await?, Some(Pdu::ReleaseRP));

    let (command, data, last, state) = handle.await?;
    assert_eq!(
        command,
        Event::Command {
            presentation_context_id: 1,
            data: vec![1, 2, 3]
        }
    );
    assert_eq!(
        data,
        Event::Data {
            presentation_context_id: 1,
            data: vec![9; 10]
        }
    );
    assert_eq!(last, Event::Released);
    assert_eq!(state, AssociationState::Closed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_association_is_aborted() -> Result<()> {
    let options = acceptor().idle_timeout(Duration::from_millis(200));
    let (handle, addr) = spawn_provider(options, |association| async move {
        let mut association = association.expect("association should be established");
        let outcome = association.next_event().await;
        (outcome, association.state())
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    requestor
        .request(vec![(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])])
        .await?;

    // stay silent
    let pdu = tokio::time::timeout(Duration::from_secs(5), requestor.receive()).await??;
    assert_eq!(
        pdu,
        Some(Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::ReasonNotSpecified
            )
        })
    );
    assert_eq!(requestor.receive().await?, None);

    let (outcome, state) = handle.await?;
    assert_matches!(outcome, Err(Error::IdleTimeout { .. }));
    assert_eq!(state, AssociationState::Aborted);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_abort_discards_partial_data() -> Result<()> {
    let (handle, addr) = spawn_provider(acceptor(), |association| async move {
        let mut association = association.expect("association should be established");
        let command = association.next_event().await.expect("command");
        let next = association.next_event().await.expect("abort");
        (command, next, association.state())
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    requestor
        .request(vec![(CT_IMAGE_STORAGE_SOP_CLASS, vec![IMPLICIT_VR_LE])])
        .await?;
    requestor
        .send(&fragment(1, PDataValueType::Command, true, &[0; 8]))
        .await?;
    requestor
        .send(&fragment(1, PDataValueType::Data, false, &[0; 64]))
        .await?;
    requestor
        .send(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        })
        .await?;

    let (command, next, state) = handle.await?;
    assert_matches!(command, Event::Command { .. });
    assert_eq!(
        next,
        Event::Aborted {
            source: AbortRQSource::ServiceUser
        }
    );
    assert_eq!(state, AssociationState::Aborted);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unexpected_pdu_aborts_association() -> Result<()> {
    let (handle, addr) = spawn_provider(acceptor(), |association| async move {
        let mut association = association.expect("association should be established");
        let outcome = association.next_event().await;
        (outcome, association.state())
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    let ac = requestor
        .request(vec![(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])])
        .await?;
    assert_matches!(ac, Pdu::AssociationAC(_));
    // a second association request is out of place
    requestor
        .request(vec![(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])])
        .await
        .map(|pdu| {
            assert_eq!(
                pdu,
                Pdu::AbortRQ {
                    source: AbortRQSource::ServiceProvider(
                        AbortRQServiceProviderReason::UnexpectedPdu
                    )
                }
            )
        })?;

    let (outcome, state) = handle.await?;
    let err = outcome.expect_err("association should fail");
    assert!(err.is_protocol_violation());
    assert_eq!(state, AssociationState::Aborted);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn data_on_rejected_context_aborts_association() -> Result<()> {
    let (handle, addr) = spawn_provider(acceptor(), |association| async move {
        let mut association = association.expect("association should be established");
        association.next_event().await
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    requestor
        .request(vec![
            (VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE]),
            (STUDY_ROOT_FIND_SOP_CLASS, vec![IMPLICIT_VR_LE]),
        ])
        .await?;
    // context 3 was rejected
    requestor
        .send(&fragment(3, PDataValueType::Command, true, &[0; 8]))
        .await?;

    assert_matches!(
        handle.await?,
        Err(Error::UnknownPresentationContext { id: 3, .. })
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_initiated_release() -> Result<()> {
    let (handle, addr) = spawn_provider(acceptor(), |association| async move {
        let mut association = association.expect("association should be established");
        let outcome = association.release().await;
        (outcome.is_ok(), association.state())
    })
    .await?;

    let mut requestor = Requestor::connect(addr).await?;
    requestor
        .request(vec![(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])])
        .await?;
    assert_eq!(requestor.receive().await?, Some(Pdu::ReleaseRQ));
    requestor.send(&Pdu::ReleaseRP).await?;

    let (released, state) = handle.await?;
    assert!(released);
    assert_eq!(state, AssociationState::Closed);
    Ok(())
}
