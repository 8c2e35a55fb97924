//! Dispatching of DIMSE messages within one association.
//!
//! Messages are served one at a time:
//! a command is answered before the next one is read.
use std::sync::Arc;

use dicom_archive_store::dataset::{self, Dataset};
use dicom_archive_ul::association::negotiation::is_supported;
use dicom_archive_ul::pdu::PDataValueType;
use dicom_archive_ul::{Event, ProviderAssociation, IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use snafu::{Backtrace, ResultExt, Snafu};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dimse::{
    self, create_cecho_response, create_cstore_response, create_unrecognized_response,
    encode_command, Command, Status, C_ECHO_RQ, C_STORE_RQ,
};
use crate::service::{RequestContext, ServiceHandler};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum DispatchError {
    #[snafu(display("Association failed"))]
    Association {
        #[snafu(backtrace)]
        source: dicom_archive_ul::association::Error,
    },

    #[snafu(display("Invalid command on presentation context {}", id))]
    InvalidCommand {
        id: u8,
        #[snafu(backtrace)]
        source: dimse::Error,
    },

    #[snafu(display("Could not encode response"))]
    EncodeResponse {
        #[snafu(backtrace)]
        source: dimse::Error,
    },

    #[snafu(display("Data set without a command on presentation context {}", id))]
    UnexpectedDataSet { id: u8, backtrace: Backtrace },

    #[snafu(display(
        "Command on presentation context {} while awaiting the data set of message {}",
        id,
        message_id
    ))]
    UnexpectedCommand {
        id: u8,
        message_id: u16,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

/// A request command waiting for its data set.
#[derive(Debug)]
struct Pending {
    presentation_context_id: u8,
    command: Command,
}

/// Serve DIMSE requests on an established association until it ends.
///
/// When `stop` is cancelled,
/// the association is released as soon as no message is in progress.
/// Returns once the association is released or aborted.
pub async fn serve<S>(
    association: ProviderAssociation<S>,
    handler: Arc<dyn ServiceHandler>,
    stop: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut dispatcher = Dispatcher {
        association,
        handler,
        pending: None,
    };
    dispatcher.run(stop).await
}

struct Dispatcher<S> {
    association: ProviderAssociation<S>,
    handler: Arc<dyn ServiceHandler>,
    pending: Option<Pending>,
}

impl<S> Dispatcher<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(&mut self, stop: CancellationToken) -> Result<()> {
        loop {
            let event = if self.pending.is_none() && self.association.is_between_messages() {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        info!("Releasing association with {}", self.association.calling_ae_title());
                        return self.association.release().await.context(AssociationSnafu);
                    }
                    event = self.association.next_event() => event,
                }
            } else {
                self.association.next_event().await
            }
            .context(AssociationSnafu)?;

            match event {
                Event::Command {
                    presentation_context_id,
                    data,
                } => self.on_command(presentation_context_id, &data).await?,
                Event::Data {
                    presentation_context_id,
                    data,
                } => self.on_data(presentation_context_id, data).await?,
                Event::Released => {
                    if let Some(pending) = self.pending.take() {
                        warn!(
                            "Discarding message {} of released association, data set never arrived",
                            pending.command.message_id
                        );
                    }
                    return Ok(());
                }
                Event::Aborted { .. } => {
                    if let Some(pending) = self.pending.take() {
                        warn!(
                            "Discarding message {} of aborted association",
                            pending.command.message_id
                        );
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn on_command(&mut self, id: u8, data: &[u8]) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            self.association.abort().await;
            return UnexpectedCommandSnafu {
                id,
                message_id: pending.command.message_id,
            }
            .fail();
        }

        let command = match Command::decode(data) {
            Ok(command) => command,
            Err(e) => {
                self.association.abort().await;
                return Err(e).context(InvalidCommandSnafu { id });
            }
        };
        debug!(
            "Command {:#06x} (message {}) on context {}",
            command.command_field, command.message_id, id
        );

        match command.command_field {
            C_ECHO_RQ => {
                let status = self.handler.echo(&self.request_context(id, &command));
                info!("Echo from {}: {}", self.association.calling_ae_title(), status);
                self.respond(id, create_cecho_response(command.message_id, status))
                    .await
            }
            C_STORE_RQ if !command.has_data_set => {
                warn!("C-STORE request {} without data set", command.message_id);
                let response = create_cstore_response(
                    command.message_id,
                    command.affected_sop_class_uid.as_deref().unwrap_or_default(),
                    command.affected_sop_instance_uid.as_deref().unwrap_or_default(),
                    Status::CannotUnderstand,
                );
                self.respond(id, response).await
            }
            field if !command.has_data_set && field != C_STORE_RQ => {
                warn!("Unsupported command {:#06x}", field);
                self.respond(id, create_unrecognized_response(field, command.message_id))
                    .await
            }
            _ => {
                self.pending = Some(Pending {
                    presentation_context_id: id,
                    command,
                });
                Ok(())
            }
        }
    }

    async fn on_data(&mut self, id: u8, data: Vec<u8>) -> Result<()> {
        let Some(Pending {
            presentation_context_id,
            command,
        }) = self.pending.take()
        else {
            self.association.abort().await;
            return UnexpectedDataSetSnafu { id }.fail();
        };

        if command.command_field != C_STORE_RQ {
            warn!("Unsupported command {:#06x}", command.command_field);
            let response = create_unrecognized_response(command.command_field, command.message_id);
            return self.respond(presentation_context_id, response).await;
        }

        let status = if id != presentation_context_id {
            warn!(
                "Data set on context {} for command on context {}",
                id, presentation_context_id
            );
            Status::DataSetMismatch
        } else {
            self.store(id, &command, data).await
        };
        if !status.is_success() {
            warn!(
                "C-STORE request {} from {} failed: {}",
                command.message_id,
                self.association.calling_ae_title(),
                status
            );
        }

        let response = create_cstore_response(
            command.message_id,
            command.affected_sop_class_uid.as_deref().unwrap_or_default(),
            command.affected_sop_instance_uid.as_deref().unwrap_or_default(),
            status,
        );
        self.respond(presentation_context_id, response).await
    }

    /// Validate a C-STORE request and hand it to the service handler.
    async fn store(&mut self, id: u8, command: &Command, data: Vec<u8>) -> Status {
        let (Some(sop_class_uid), Some(sop_instance_uid)) = (
            command.affected_sop_class_uid.as_deref(),
            command.affected_sop_instance_uid.as_deref(),
        ) else {
            return Status::CannotUnderstand;
        };
        let Some(pc) = self.association.accepted_context(id) else {
            return Status::SopClassNotSupported;
        };
        if pc.abstract_syntax != sop_class_uid {
            return Status::SopClassNotSupported;
        }
        let Some(ts) = pc.transfer_syntax.as_deref().filter(|ts| is_supported(ts)) else {
            return Status::TransferSyntaxNotSupported;
        };

        let meta = match FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(sop_class_uid)
            .media_storage_sop_instance_uid(sop_instance_uid)
            .transfer_syntax(ts)
            .implementation_class_uid(IMPLEMENTATION_CLASS_UID)
            .implementation_version_name(IMPLEMENTATION_VERSION_NAME)
            .source_application_entity_title(self.association.calling_ae_title())
            .build()
        {
            Ok(meta) => meta,
            Err(e) => {
                debug!("Could not build file meta group: {}", e);
                return Status::CannotUnderstand;
            }
        };

        let dataset = match Dataset::from_encoded(meta, data) {
            Ok(dataset) => dataset,
            Err(dataset::Error::UnsupportedTransferSyntax { .. }) => {
                return Status::TransferSyntaxNotSupported
            }
            Err(e) => {
                debug!("Could not decode data set: {}", e);
                return Status::CannotUnderstand;
            }
        };
        if let Some(status) = check_dataset(&dataset, ts) {
            return status;
        }

        let handler = Arc::clone(&self.handler);
        let context = self.request_context(id, command);
        match tokio::task::spawn_blocking(move || handler.store(&context, dataset)).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Store task failed: {}", e);
                Status::OutOfResources
            }
        }
    }

    fn request_context(&self, id: u8, command: &Command) -> RequestContext {
        RequestContext {
            calling_ae_title: self.association.calling_ae_title().to_string(),
            presentation_context_id: id,
            message_id: command.message_id,
        }
    }

    async fn respond(&mut self, id: u8, response: InMemDicomObject) -> Result<()> {
        let data = encode_command(&response).context(EncodeResponseSnafu)?;
        self.association
            .send_message(id, PDataValueType::Command, &data)
            .await
            .context(AssociationSnafu)
    }
}

/// Check the attributes of a decoded data set against its command,
/// returning the failure status if they disagree.
fn check_dataset(dataset: &Dataset, negotiated_ts: &str) -> Option<Status> {
    if let Some(declared) = dataset.declared_sop_class_uid() {
        if declared != dataset.sop_class_uid() {
            return Some(Status::DataSetMismatch);
        }
    }
    if let Some(declared) = dataset.declared_sop_instance_uid() {
        if declared != dataset.sop_instance_uid() {
            return Some(Status::DataSetMismatch);
        }
    }
    let declared_ts = dataset
        .object()
        .get(tags::TRANSFER_SYNTAX_UID)
        .and_then(|e| e.to_str().ok())
        .map(|ts| ts.trim_end_matches(['\0', ' ']).to_string());
    match declared_ts {
        Some(ts) if !ts.is_empty() && ts != negotiated_ts => {
            Some(Status::TransferSyntaxNotSupported)
        }
        _ => None,
    }
}
