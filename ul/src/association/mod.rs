//! Association module
//!
//! This module contains the acceptor side of DICOM associations:
//! - [`negotiation`] decides on an association request
//!   against the options of this application entity;
//! - [`provider`] runs the state machine of a single association
//!   over an asynchronous byte stream.
pub mod negotiation;
pub mod provider;

use std::time::Duration;

use snafu::{Backtrace, Snafu};

use crate::pdu::{
    reader, writer, AbortRQSource, AssociationRJ, Pdu, PresentationContextResultReason,
};

/// The state of an association, as seen by the acceptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AssociationState {
    /// No transport connection bound yet
    Idle,
    /// Transport connected, association request being read and negotiated
    Requested,
    /// Negotiation succeeded, DIMSE messages may be exchanged
    Established,
    /// A release was requested by either side and is awaiting completion
    Releasing,
    /// Released or rejected in an orderly fashion
    Closed,
    /// Terminated abruptly, by protocol violation, timeout, or peer abort
    Aborted,
}

impl AssociationState {
    /// Whether the association has terminated.
    pub fn is_terminal(self) -> bool {
        matches!(self, AssociationState::Closed | AssociationState::Aborted)
    }
}

impl std::fmt::Display for AssociationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AssociationState::Idle => "idle",
            AssociationState::Requested => "requested",
            AssociationState::Established => "established",
            AssociationState::Releasing => "releasing",
            AssociationState::Closed => "closed",
            AssociationState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A presentation context as negotiated at association establishment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresentationContext {
    /// the presentation context identifier
    pub id: u8,
    /// the abstract syntax UID requested
    pub abstract_syntax: String,
    /// the transfer syntaxes proposed by the requestor, in order
    pub proposed_transfer_syntaxes: Vec<String>,
    /// the accepted transfer syntax, if the context was accepted
    pub transfer_syntax: Option<String>,
    /// the outcome of the negotiation
    pub result: PresentationContextResultReason,
}

impl PresentationContext {
    pub fn is_accepted(&self) -> bool {
        self.result == PresentationContextResultReason::Acceptance
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// invalid acceptor options
    InvalidOptions { source: reader::Error },

    /// malformed PDU received
    ReceivePdu { source: reader::Error },

    /// failed to encode PDU
    EncodePdu { source: writer::Error },

    /// failed to read from the transport
    ReadTransport {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to write to the transport
    WriteTransport {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// peer closed the connection without releasing the association
    ConnectionClosed { backtrace: Backtrace },

    #[snafu(display("no PDU received within {:?}", timeout))]
    IdleTimeout {
        timeout: Duration,
        backtrace: Backtrace,
    },

    #[snafu(display("unexpected PDU in state {}: {}", state, pdu.short_description()))]
    UnexpectedPdu {
        state: AssociationState,
        pdu: Box<Pdu>,
        backtrace: Backtrace,
    },

    #[snafu(display("unrecognized PDU type {:#04x}", pdu_type))]
    UnrecognizedPdu { pdu_type: u8, backtrace: Backtrace },

    #[snafu(display("presentation data value on unaccepted context {}", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display("interleaved presentation data values on context {}", id))]
    InterleavedFragments { id: u8, backtrace: Backtrace },

    #[snafu(display("association rejected: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    #[snafu(display("association aborted by peer: {:?}", abort_source))]
    PeerAborted {
        abort_source: AbortRQSource,
        backtrace: Backtrace,
    },

    #[snafu(display("operation not permitted in state {}", state))]
    InvalidState {
        state: AssociationState,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Whether this error stems from a protocol violation by the peer
    /// (malformed or out-of-state PDU).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::ReceivePdu { .. }
                | Error::UnexpectedPdu { .. }
                | Error::UnrecognizedPdu { .. }
                | Error::UnknownPresentationContext { .. }
                | Error::InterleavedFragments { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
