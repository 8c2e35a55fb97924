//! Provider side of an established association.
//!
//! A [`ProviderAssociation`] owns the transport of one connection
//! and drives the association state machine:
//! it reads and negotiates the association request,
//! reassembles fragmented DIMSE messages,
//! and handles release and abort in either direction.
use std::time::Duration;

use snafu::{ensure, ResultExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::association::negotiation::AcceptorOptions;
use crate::association::{
    AssociationState, ConnectionClosedSnafu, EncodePduSnafu, IdleTimeoutSnafu,
    InterleavedFragmentsSnafu, InvalidOptionsSnafu, InvalidStateSnafu, PeerAbortedSnafu,
    PresentationContext, ReadTransportSnafu, ReceivePduSnafu, RejectedSnafu, Result,
    UnexpectedPduSnafu, UnknownPresentationContextSnafu, UnrecognizedPduSnafu,
    WriteTransportSnafu,
};
use crate::pdu::{
    write_pdu, AbortRQServiceProviderReason, AbortRQSource, PDataValue, PDataValueType, Pdu,
    PduBuffer,
};

/// Bytes taken by a presentation data value item ahead of its value:
/// item length (4), presentation context ID (1), message control header (1).
const PDV_ITEM_OVERHEAD: u32 = 6;

/// An event on an established association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete DIMSE command was received
    Command {
        presentation_context_id: u8,
        data: Vec<u8>,
    },
    /// A complete DIMSE data set was received
    Data {
        presentation_context_id: u8,
        data: Vec<u8>,
    },
    /// The requestor released the association, which is now closed
    Released,
    /// The requestor aborted the association
    Aborted { source: AbortRQSource },
}

/// A message being reassembled from presentation data value fragments.
#[derive(Debug)]
struct PartialMessage {
    presentation_context_id: u8,
    value_type: PDataValueType,
    data: Vec<u8>,
}

/// The acceptor side of an association over an asynchronous transport.
///
/// Created with [`ProviderAssociation::accept`],
/// which only returns once the association is established.
#[derive(Debug)]
pub struct ProviderAssociation<S> {
    socket: S,
    buffer: PduBuffer,
    state: AssociationState,
    local_ae_title: String,
    calling_ae_title: String,
    called_ae_title: String,
    presentation_contexts: Vec<PresentationContext>,
    acceptor_max_pdu_length: u32,
    requestor_max_pdu_length: u32,
    idle_timeout: Option<Duration>,
    partial: Option<PartialMessage>,
    ready: std::collections::VecDeque<Event>,
}

impl<S> ProviderAssociation<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Bind a freshly connected transport to a new association,
    /// then read and negotiate the association request.
    ///
    /// On success the association is established.
    /// If the request is rejected, an A-ASSOCIATE-RJ is sent back,
    /// the transport is closed
    /// and [`Error::Rejected`](crate::association::Error::Rejected) is returned.
    /// Malformed or unexpected PDUs abort the association.
    pub async fn accept(socket: S, options: &AcceptorOptions) -> Result<Self> {
        let buffer = PduBuffer::new(options.get_max_pdu_length(), options.is_strict())
            .context(InvalidOptionsSnafu)?;
        let mut association = ProviderAssociation {
            socket,
            buffer,
            state: AssociationState::Idle,
            local_ae_title: options.get_ae_title().to_string(),
            calling_ae_title: String::new(),
            called_ae_title: String::new(),
            presentation_contexts: Vec::new(),
            acceptor_max_pdu_length: options.get_max_pdu_length(),
            requestor_max_pdu_length: options.get_max_pdu_length(),
            idle_timeout: options.get_idle_timeout(),
            partial: None,
            ready: Default::default(),
        };
        association.state = AssociationState::Requested;

        let rq = match association.receive_pdu().await? {
            Pdu::AssociationRQ(rq) => rq,
            Pdu::AbortRQ { source } => {
                association.close(AssociationState::Aborted).await;
                return PeerAbortedSnafu {
                    abort_source: source,
                }
                .fail();
            }
            pdu => return association.fail_unexpected(pdu).await,
        };
        association.calling_ae_title = rq.calling_ae_title.clone();
        association.called_ae_title = rq.called_ae_title.clone();

        match options.negotiate(&rq) {
            Ok(negotiated) => {
                association
                    .send(&Pdu::AssociationAC(negotiated.acknowledgement))
                    .await?;
                association.presentation_contexts = negotiated.presentation_contexts;
                association.requestor_max_pdu_length = negotiated.requestor_max_pdu_length;
                association.state = AssociationState::Established;
                info!(
                    "Association established with {} ({} of {} presentation contexts accepted)",
                    association.calling_ae_title,
                    association
                        .presentation_contexts
                        .iter()
                        .filter(|pc| pc.is_accepted())
                        .count(),
                    association.presentation_contexts.len(),
                );
                Ok(association)
            }
            Err(association_rj) => {
                association.send(&Pdu::AssociationRJ(association_rj)).await?;
                association.close(AssociationState::Closed).await;
                RejectedSnafu { association_rj }.fail()
            }
        }
    }

    /// The current state of the association.
    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// The application entity title of this node.
    pub fn local_ae_title(&self) -> &str {
        &self.local_ae_title
    }

    /// The application entity title of the requestor.
    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }

    /// The application entity title called by the requestor.
    pub fn called_ae_title(&self) -> &str {
        &self.called_ae_title
    }

    /// All presentation contexts negotiated, accepted or not.
    pub fn presentation_contexts(&self) -> &[PresentationContext] {
        &self.presentation_contexts
    }

    /// Retrieve an accepted presentation context by its identifier.
    pub fn accepted_context(&self, id: u8) -> Option<&PresentationContext> {
        self.presentation_contexts
            .iter()
            .find(|pc| pc.id == id && pc.is_accepted())
    }

    /// The maximum PDU length that the requestor is able to receive.
    pub fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    /// The maximum PDU length that this node is able to receive.
    pub fn acceptor_max_pdu_length(&self) -> u32 {
        self.acceptor_max_pdu_length
    }

    /// Whether no message is partially received,
    /// meaning that the requestor is not in the middle of an exchange.
    pub fn is_between_messages(&self) -> bool {
        self.partial.is_none() && self.ready.is_empty() && self.buffer.is_empty()
    }

    /// Wait for the next event on the association.
    ///
    /// A release request is answered right away,
    /// closing the association.
    /// Reading is cancel safe:
    /// dropping the returned future before completion loses no data.
    ///
    /// Errors abort the association:
    /// the requestor is sent an A-ABORT where appropriate,
    /// any partially received message is discarded,
    /// and the transport is closed.
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(event);
            }
            ensure!(
                self.state == AssociationState::Established,
                InvalidStateSnafu { state: self.state }
            );

            match self.receive_pdu().await? {
                Pdu::PData { data } => self.collect_fragments(data).await?,
                Pdu::ReleaseRQ => {
                    self.state = AssociationState::Releasing;
                    self.discard_partial();
                    self.send(&Pdu::ReleaseRP).await?;
                    self.close(AssociationState::Closed).await;
                    info!("Association with {} released", self.calling_ae_title);
                    return Ok(Event::Released);
                }
                Pdu::AbortRQ { source } => {
                    warn!("Association aborted by {}: {:?}", self.calling_ae_title, source);
                    self.close(AssociationState::Aborted).await;
                    return Ok(Event::Aborted { source });
                }
                pdu => return self.fail_unexpected(pdu).await,
            }
        }
    }

    /// Send a DIMSE command or data set,
    /// fragmented according to the requestor's maximum PDU length.
    pub async fn send_message(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
        data: &[u8],
    ) -> Result<()> {
        ensure!(
            self.state == AssociationState::Established,
            InvalidStateSnafu { state: self.state }
        );
        let max_fragment = self
            .requestor_max_pdu_length
            .saturating_sub(PDV_ITEM_OVERHEAD)
            .max(1) as usize;

        let mut chunks = data.chunks(max_fragment).peekable();
        if chunks.peek().is_none() {
            return self
                .send(&Pdu::PData {
                    data: vec![PDataValue {
                        presentation_context_id,
                        value_type,
                        is_last: true,
                        data: Vec::new(),
                    }],
                })
                .await;
        }
        while let Some(chunk) = chunks.next() {
            let pdu = Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last: chunks.peek().is_none(),
                    data: chunk.to_vec(),
                }],
            };
            self.send(&pdu).await?;
        }
        Ok(())
    }

    /// Release the association on this node's initiative.
    ///
    /// Sends an A-RELEASE-RQ and waits for the reply.
    /// Presentation data arriving meanwhile aborts the association.
    pub async fn release(&mut self) -> Result<()> {
        ensure!(
            self.state == AssociationState::Established,
            InvalidStateSnafu { state: self.state }
        );
        self.send(&Pdu::ReleaseRQ).await?;
        self.state = AssociationState::Releasing;
        self.discard_partial();

        match self.receive_pdu().await? {
            Pdu::ReleaseRP => {
                self.close(AssociationState::Closed).await;
                info!("Association with {} released", self.calling_ae_title);
                Ok(())
            }
            // release collision
            Pdu::ReleaseRQ => {
                self.send(&Pdu::ReleaseRP).await?;
                self.close(AssociationState::Closed).await;
                Ok(())
            }
            Pdu::AbortRQ { source } => {
                self.close(AssociationState::Aborted).await;
                PeerAbortedSnafu {
                    abort_source: source,
                }
                .fail()
            }
            pdu => self.fail_unexpected(pdu).await,
        }
    }

    /// Abort the association on this node's initiative.
    pub async fn abort(&mut self) {
        self.abort_with(AbortRQServiceProviderReason::ReasonNotSpecified)
            .await;
    }

    /// Append incoming fragments to the message in progress,
    /// queueing an event for every message completed.
    async fn collect_fragments(&mut self, values: Vec<PDataValue>) -> Result<()> {
        for value in values {
            let id = value.presentation_context_id;
            if self.accepted_context(id).is_none() {
                self.abort_with(AbortRQServiceProviderReason::InvalidPduParameter)
                    .await;
                return UnknownPresentationContextSnafu { id }.fail();
            }

            let partial = self.partial.get_or_insert_with(|| PartialMessage {
                presentation_context_id: id,
                value_type: value.value_type,
                data: Vec::new(),
            });
            if partial.presentation_context_id != id || partial.value_type != value.value_type {
                self.abort_with(AbortRQServiceProviderReason::UnexpectedPduParameter)
                    .await;
                return InterleavedFragmentsSnafu { id }.fail();
            }
            partial.data.extend_from_slice(&value.data);

            if value.is_last {
                if let Some(message) = self.partial.take() {
                    debug!(
                        "Received {:?} of {} bytes on context {}",
                        message.value_type,
                        message.data.len(),
                        message.presentation_context_id
                    );
                    self.ready.push_back(match message.value_type {
                        PDataValueType::Command => Event::Command {
                            presentation_context_id: message.presentation_context_id,
                            data: message.data,
                        },
                        PDataValueType::Data => Event::Data {
                            presentation_context_id: message.presentation_context_id,
                            data: message.data,
                        },
                    });
                }
            }
        }
        Ok(())
    }

    /// Read the next whole PDU from the transport,
    /// aborting the association on failure or idle timeout.
    async fn receive_pdu(&mut self) -> Result<Pdu> {
        loop {
            match self.buffer.next_pdu() {
                Ok(Some(pdu)) => {
                    debug!("<< {}", pdu.short_description());
                    return Ok(pdu);
                }
                Ok(None) => {}
                Err(source) => {
                    self.abort_with(AbortRQServiceProviderReason::InvalidPduParameter)
                        .await;
                    return Err(source).context(ReceivePduSnafu);
                }
            }

            let read = self.socket.read_buf(self.buffer.buffer_mut());
            let read = match self.idle_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, read).await {
                    Ok(read) => read,
                    Err(_) => {
                        warn!("No PDU received within {:?}, aborting", timeout);
                        self.abort_with(AbortRQServiceProviderReason::ReasonNotSpecified)
                            .await;
                        return IdleTimeoutSnafu { timeout }.fail();
                    }
                },
                None => read.await,
            };

            match read {
                Ok(0) => {
                    self.close(AssociationState::Aborted).await;
                    return ConnectionClosedSnafu.fail();
                }
                Ok(_) => {}
                Err(e) => {
                    self.close(AssociationState::Aborted).await;
                    return Err(e).context(ReadTransportSnafu);
                }
            }
        }
    }

    async fn send(&mut self, pdu: &Pdu) -> Result<()> {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu).context(EncodePduSnafu)?;
        debug!(">> {}", pdu.short_description());
        if let Err(e) = self.socket.write_all(&bytes).await {
            self.close(AssociationState::Aborted).await;
            return Err(e).context(WriteTransportSnafu);
        }
        Ok(())
    }

    async fn fail_unexpected<T>(&mut self, pdu: Pdu) -> Result<T> {
        let state = self.state;
        if let Pdu::Unknown { pdu_type, .. } = pdu {
            self.abort_with(AbortRQServiceProviderReason::UnrecognizedPdu)
                .await;
            return UnrecognizedPduSnafu { pdu_type }.fail();
        }
        self.abort_with(AbortRQServiceProviderReason::UnexpectedPdu)
            .await;
        UnexpectedPduSnafu {
            state,
            pdu: Box::new(pdu),
        }
        .fail()
    }

    /// Send an A-ABORT on a best effort basis and close the transport.
    async fn abort_with(&mut self, reason: AbortRQServiceProviderReason) {
        if self.state.is_terminal() {
            return;
        }
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(reason),
        };
        let mut bytes = Vec::new();
        if write_pdu(&mut bytes, &pdu).is_ok() {
            if let Err(e) = self.socket.write_all(&bytes).await {
                debug!("Could not send A-ABORT: {}", e);
            }
        }
        self.close(AssociationState::Aborted).await;
    }

    fn discard_partial(&mut self) {
        if let Some(partial) = self.partial.take() {
            warn!(
                "Discarding {} bytes of incomplete {:?}",
                partial.data.len(),
                partial.value_type
            );
        }
        self.ready.clear();
    }

    async fn close(&mut self, state: AssociationState) {
        self.discard_partial();
        self.state = state;
        if let Err(e) = self.socket.shutdown().await {
            debug!("Could not shut down transport: {}", e);
        }
    }
}
