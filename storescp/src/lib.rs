//! A DICOM storage service class provider for the archive.
//!
//! The provider accepts associations over TCP,
//! answers C-ECHO requests,
//! and persists the instances of C-STORE requests
//! into an [`InstanceStore`](dicom_archive_store::InstanceStore).
//!
//! - [`StorageScp::start`] binds the listener
//!   and returns a [`ScpHandle`] to stop it gracefully;
//! - [`ScpConfig`] holds the immutable configuration of the provider;
//! - [`ServiceHandler`] is the interface with one method per DIMSE service,
//!   implemented by [`ArchiveService`].
//!
//! Each association is served by its own task.
//! Within one association commands are handled strictly one after the other.
pub mod config;
pub mod dimse;
pub mod dispatcher;
pub mod listener;
pub mod service;
pub mod transfer;

pub use config::{ConfigError, ScpConfig};
pub use dimse::Status;
pub use listener::{ListenerError, ScpHandle, StorageScp};
pub use service::{ArchiveService, RequestContext, ServiceHandler};
