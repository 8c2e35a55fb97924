//! Service handlers.
//!
//! Each supported DIMSE service is one method of [`ServiceHandler`].
//! The dispatcher validates requests against the negotiated presentation
//! contexts before calling into the handler,
//! so handlers only deal with well formed requests.
use dicom_archive_store::{Dataset, Error as StoreError, InstanceStore};
use snafu::Report;
use tracing::{info, warn};

use crate::dimse::Status;

/// Information about the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// the AE title of the requestor
    pub calling_ae_title: String,
    /// the presentation context of the request
    pub presentation_context_id: u8,
    /// the message ID of the request
    pub message_id: u16,
}

/// The services provided over an association.
///
/// Handlers are shared by all associations
/// and may run concurrently for distinct associations.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Handle a C-ECHO request.
    fn echo(&self, _context: &RequestContext) -> Status {
        Status::Success
    }

    /// Handle a C-STORE request.
    ///
    /// Runs on a blocking thread.
    fn store(&self, context: &RequestContext, dataset: Dataset) -> Status;
}

/// Service handler persisting every stored instance into an [`InstanceStore`].
#[derive(Debug, Clone)]
pub struct ArchiveService {
    store: InstanceStore,
}

impl ArchiveService {
    pub fn new(store: InstanceStore) -> Self {
        ArchiveService { store }
    }

    pub fn instance_store(&self) -> &InstanceStore {
        &self.store
    }
}

impl ServiceHandler for ArchiveService {
    fn store(&self, context: &RequestContext, dataset: Dataset) -> Status {
        match self.store.put(&dataset) {
            Ok(stored) => {
                info!(
                    "Stored {} from {} ({})",
                    stored.path.display(),
                    context.calling_ae_title,
                    stored.transfer_syntax
                );
                Status::Success
            }
            Err(e @ StoreError::InvalidInstanceId { .. }) => {
                warn!("Refusing instance: {}", e);
                Status::CannotUnderstand
            }
            Err(e) => {
                warn!("Could not store instance: {}", Report::from_error(e));
                Status::OutOfResources
            }
        }
    }
}
