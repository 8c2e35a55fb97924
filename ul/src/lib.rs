//! This crate contains the types and methods needed by a DICOM archive
//! to act as an association acceptor through the upper layer protocol.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   as well as their binary reader and writer.
//! - The [`association`] module
//!   comprises the acceptor side of association negotiation
//!   and the per-connection state machine
//!   running an established association over TCP.

pub mod association;
pub mod pdu;

/// The implementation class UID of the archive.
///
/// Automatically generated as per the standard, part 5, section B.2.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.302141128412584753064649614606182938553";

/// The implementation version name of the archive.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOM-ARCHIVE 0.1";

// re-exports

pub use association::negotiation::AcceptorOptions;
pub use association::provider::{Event, ProviderAssociation};
pub use association::AssociationState;
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
