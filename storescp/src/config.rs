//! Storage service provider configuration.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use dicom_archive_ul::association::negotiation::{AcceptorOptions, CalledAeTitlePolicy};
use dicom_archive_ul::pdu::reader::{DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE};
use snafu::{ensure, Backtrace, Snafu};

use crate::transfer::{
    NATIVE_TRANSFER_SYNTAXES, STORAGE_SOP_CLASSES, TRANSFER_SYNTAXES, VERIFICATION_SOP_CLASS,
};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ConfigError {
    #[snafu(display("Invalid AE title {:?}: must be 1 to 16 characters", ae_title))]
    InvalidAeTitle {
        ae_title: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Invalid maximum PDU length {}: must be between {} and {}",
        max_pdu_length,
        MINIMUM_PDU_SIZE,
        MAXIMUM_PDU_SIZE
    ))]
    InvalidMaxPduLength {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },
}

/// The configuration of a storage service provider.
///
/// Built once and handed to [`StorageScp::start`](crate::StorageScp::start),
/// after which it can no longer change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpConfig {
    /// the address to listen on
    pub bind_address: IpAddr,
    /// the TCP port to listen on (0 for any)
    pub port: u16,
    /// the application entity title of this node
    pub ae_title: String,
    /// the maximum PDU length this node is able to receive
    pub max_pdu_length: u32,
    /// how long to wait for the next PDU before aborting an association
    pub idle_timeout: Option<Duration>,
    /// refuse PDUs longer than the maximum PDU length
    pub strict: bool,
    /// accept abstract syntaxes outside of the known storage SOP classes
    pub promiscuous: bool,
    /// only accept native, uncompressed transfer syntaxes
    pub uncompressed_only: bool,
    /// policy on the called AE title of association requests
    pub called_ae_title_policy: CalledAeTitlePolicy,
    /// the root directory of the archive
    pub archive_root: PathBuf,
}

impl Default for ScpConfig {
    fn default() -> Self {
        ScpConfig {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 11111,
            ae_title: "STORE-SCP".to_string(),
            max_pdu_length: DEFAULT_MAX_PDU,
            idle_timeout: Some(Duration::from_secs(60)),
            strict: false,
            promiscuous: false,
            uncompressed_only: false,
            called_ae_title_policy: CalledAeTitlePolicy::AcceptAny,
            archive_root: PathBuf::from("."),
        }
    }
}

impl ScpConfig {
    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ae_title = self.ae_title.trim();
        ensure!(
            !ae_title.is_empty() && ae_title.len() <= 16 && ae_title.is_ascii(),
            InvalidAeTitleSnafu {
                ae_title: &self.ae_title
            }
        );
        ensure!(
            (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&self.max_pdu_length),
            InvalidMaxPduLengthSnafu {
                max_pdu_length: self.max_pdu_length
            }
        );
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// The association acceptor options derived from this configuration.
    pub fn acceptor_options(&self) -> AcceptorOptions {
        let mut options = AcceptorOptions::new()
            .ae_title(self.ae_title.trim().to_string())
            .max_pdu_length(self.max_pdu_length)
            .strict(self.strict)
            .promiscuous(self.promiscuous)
            .called_ae_title_policy(self.called_ae_title_policy)
            .with_abstract_syntax(VERIFICATION_SOP_CLASS);
        if let Some(timeout) = self.idle_timeout {
            options = options.idle_timeout(timeout);
        }
        for uid in STORAGE_SOP_CLASSES {
            options = options.with_abstract_syntax(*uid);
        }
        let transfer_syntaxes = if self.uncompressed_only {
            NATIVE_TRANSFER_SYNTAXES
        } else {
            TRANSFER_SYNTAXES
        };
        for uid in transfer_syntaxes {
            options = options.with_transfer_syntax(*uid);
        }
        options
    }
}
