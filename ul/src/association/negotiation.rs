//! Association negotiation, acceptor side.
//!
//! [`AcceptorOptions`] holds the immutable description of what this
//! application entity accepts, and decides on each association request,
//! either with an acknowledgement carrying the outcome of every
//! presentation context, or with a rejection.
use std::borrow::Cow;
use std::time::Duration;

use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use tracing::{debug, warn};

use crate::association::PresentationContext;
use crate::pdu::reader::DEFAULT_MAX_PDU;
use crate::pdu::{
    AssociationAC, AssociationRJ, AssociationRJResult, AssociationRJServiceProviderAsceReason,
    AssociationRJServiceUserReason, AssociationRJSource, AssociationRQ, PresentationContextResult,
    PresentationContextResultReason, UserVariableItem, APPLICATION_CONTEXT_NAME,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

/// The transfer syntax reported in the result of a rejected presentation context.
const REJECTED_CONTEXT_TRANSFER_SYNTAX: &str = "1.2.840.10008.1.2";

/// Policy on the called AE title of incoming association requests.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CalledAeTitlePolicy {
    /// Accept any called AE title
    #[default]
    AcceptAny,
    /// Only accept requests calling this application entity's own title
    RequireOwn,
}

/// Options for accepting associations as a service class provider.
///
/// ```
/// # use dicom_archive_ul::association::negotiation::AcceptorOptions;
/// let options = AcceptorOptions::new()
///     .ae_title("ARCHIVE")
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .with_transfer_syntax("1.2.840.10008.1.2.1")
///     .with_transfer_syntax("1.2.840.10008.1.2");
/// assert_eq!(options.get_ae_title(), "ARCHIVE");
/// ```
///
/// When no transfer syntax is declared,
/// every transfer syntax supported by the transfer syntax registry is accepted.
#[derive(Debug, Clone)]
pub struct AcceptorOptions {
    ae_title: Cow<'static, str>,
    abstract_syntax_uids: Vec<Cow<'static, str>>,
    transfer_syntax_uids: Vec<Cow<'static, str>>,
    promiscuous: bool,
    max_pdu_length: u32,
    strict: bool,
    idle_timeout: Option<Duration>,
    called_ae_title_policy: CalledAeTitlePolicy,
}

impl Default for AcceptorOptions {
    fn default() -> Self {
        AcceptorOptions {
            ae_title: "THIS-SCP".into(),
            abstract_syntax_uids: Vec::new(),
            transfer_syntax_uids: Vec::new(),
            promiscuous: false,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: false,
            idle_timeout: None,
            called_ae_title_policy: CalledAeTitlePolicy::AcceptAny,
        }
    }
}

/// The outcome of a successful negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    /// the acknowledgement to send back
    pub acknowledgement: AssociationAC,
    /// all presentation contexts, accepted or not
    pub presentation_contexts: Vec<PresentationContext>,
    /// maximum PDU length the requestor is able to receive
    pub requestor_max_pdu_length: u32,
}

impl AcceptorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the application entity title of this node.
    pub fn ae_title<T>(mut self, ae_title: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.ae_title = ae_title.into();
        self
    }

    /// Include this abstract syntax in the list of accepted abstract syntaxes.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.abstract_syntax_uids
            .push(trim_uid(abstract_syntax_uid.into()));
        self
    }

    /// Include this transfer syntax in the list of accepted transfer syntaxes.
    ///
    /// Transfer syntaxes are only accepted if also
    /// supported by the transfer syntax registry.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.transfer_syntax_uids
            .push(trim_uid(transfer_syntax_uid.into()));
        self
    }

    /// Override promiscuous mode:
    /// whether to accept unknown abstract syntaxes.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    /// Override the maximum PDU length that this node is able to receive.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether incoming PDUs must not surpass the maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the time to wait for the next PDU before aborting the association.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the policy on called AE titles.
    pub fn called_ae_title_policy(mut self, policy: CalledAeTitlePolicy) -> Self {
        self.called_ae_title_policy = policy;
        self
    }

    pub fn get_ae_title(&self) -> &str {
        &self.ae_title
    }

    pub fn get_max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    pub fn get_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Decide on an association request.
    ///
    /// Each proposed presentation context is accepted with the first
    /// proposed transfer syntax which is also supported here,
    /// or rejected on its own.
    /// The whole association is rejected
    /// if the request is not acceptable
    /// or no presentation context could be accepted.
    pub fn negotiate(&self, rq: &AssociationRQ) -> Result<Negotiated, AssociationRJ> {
        if rq.protocol_version & 0x0001 == 0 {
            warn!("Unsupported protocol version {:#06x}", rq.protocol_version);
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceProviderAsce(
                    AssociationRJServiceProviderAsceReason::ProtocolVersionNotSupported,
                ),
            });
        }

        if rq.application_context_name.trim_end_matches('\0') != APPLICATION_CONTEXT_NAME {
            warn!(
                "Unsupported application context name {}",
                rq.application_context_name
            );
            return Err(reject_by_user(
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
            ));
        }

        if self.called_ae_title_policy == CalledAeTitlePolicy::RequireOwn
            && rq.called_ae_title != self.ae_title.trim()
        {
            warn!("Called AE title `{}` not recognized", rq.called_ae_title);
            return Err(reject_by_user(
                AssociationRJServiceUserReason::CalledAeTitleNotRecognized,
            ));
        }

        let presentation_contexts: Vec<_> = rq
            .presentation_contexts
            .iter()
            .map(|pc| {
                let abstract_syntax = pc.abstract_syntax.trim_end_matches('\0');
                let (result, transfer_syntax) = if !self.promiscuous
                    && !self
                        .abstract_syntax_uids
                        .iter()
                        .any(|uid| uid == abstract_syntax)
                {
                    (PresentationContextResultReason::AbstractSyntaxNotSupported, None)
                } else {
                    match self.choose_ts(&pc.transfer_syntaxes) {
                        Some(ts) => (PresentationContextResultReason::Acceptance, Some(ts)),
                        None => (
                            PresentationContextResultReason::TransferSyntaxesNotSupported,
                            None,
                        ),
                    }
                };
                debug!(
                    "Presentation context {} ({}): {}",
                    pc.id, abstract_syntax, result
                );
                PresentationContext {
                    id: pc.id,
                    abstract_syntax: abstract_syntax.to_string(),
                    proposed_transfer_syntaxes: pc.transfer_syntaxes.clone(),
                    transfer_syntax,
                    result,
                }
            })
            .collect();

        if !presentation_contexts.iter().any(|pc| pc.is_accepted()) {
            warn!("No presentation context could be accepted");
            return Err(reject_by_user(AssociationRJServiceUserReason::NoReasonGiven));
        }

        let requestor_max_pdu_length = match rq.max_pdu_length() {
            Some(0) => u32::MAX,
            Some(len) => len,
            None => DEFAULT_MAX_PDU,
        };

        let acknowledgement = AssociationAC {
            protocol_version: 1,
            calling_ae_title: rq.calling_ae_title.clone(),
            called_ae_title: rq.called_ae_title.clone(),
            application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: presentation_contexts
                .iter()
                .map(|pc| PresentationContextResult {
                    id: pc.id,
                    reason: pc.result,
                    transfer_syntax: pc
                        .transfer_syntax
                        .clone()
                        .unwrap_or_else(|| REJECTED_CONTEXT_TRANSFER_SYNTAX.to_string()),
                })
                .collect(),
            user_variables: vec![
                UserVariableItem::MaxLength(self.max_pdu_length),
                UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
                UserVariableItem::ImplementationVersionName(
                    IMPLEMENTATION_VERSION_NAME.to_string(),
                ),
            ],
        };

        Ok(Negotiated {
            acknowledgement,
            presentation_contexts,
            requestor_max_pdu_length,
        })
    }

    /// From a sequence of proposed transfer syntaxes,
    /// choose the first one accepted by this node.
    fn choose_ts<'a, I>(&self, proposed: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        proposed
            .into_iter()
            .map(|ts| ts.trim_end_matches('\0'))
            .find(|ts| {
                (self.transfer_syntax_uids.is_empty()
                    || self.transfer_syntax_uids.iter().any(|uid| uid == ts))
                    && is_supported(ts)
            })
            .map(str::to_string)
    }
}

/// Check that the main transfer syntax registry
/// supports the given transfer syntax,
/// meaning that it can parse and decode DICOM data sets.
pub fn is_supported(ts_uid: &str) -> bool {
    TransferSyntaxRegistry
        .get(ts_uid)
        .filter(|ts| !ts.is_unsupported())
        .is_some()
}

fn reject_by_user(reason: AssociationRJServiceUserReason) -> AssociationRJ {
    AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(reason),
    }
}

fn trim_uid(uid: Cow<'static, str>) -> Cow<'static, str> {
    if uid.ends_with('\0') {
        Cow::Owned(uid.trim_end_matches('\0').to_string())
    } else {
        uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::PresentationContextProposed;

    const VERIFICATION: &str = "1.2.840.10008.1.1";
    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
    const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
    const MADE_UP_TS: &str = "1.2.3.4.5.6.7.8";

    fn options() -> AcceptorOptions {
        AcceptorOptions::new()
            .ae_title("ARCHIVE")
            .with_abstract_syntax(VERIFICATION)
            .with_abstract_syntax(CT_IMAGE_STORAGE)
            .with_transfer_syntax(EXPLICIT_VR_LE)
            .with_transfer_syntax(IMPLICIT_VR_LE)
    }

    fn request(contexts: Vec<(&str, Vec<&str>)>) -> AssociationRQ {
        AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "MODALITY".to_string(),
            called_ae_title: "ARCHIVE".to_string(),
            application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: contexts
                .into_iter()
                .enumerate()
                .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                    id: (i * 2 + 1) as u8,
                    abstract_syntax: abstract_syntax.to_string(),
                    transfer_syntaxes: transfer_syntaxes.into_iter().map(String::from).collect(),
                })
                .collect(),
            user_variables: vec![UserVariableItem::MaxLength(32_768)],
        }
    }

    #[test]
    fn accepts_first_supported_transfer_syntax() {
        let rq = request(vec![(CT_IMAGE_STORAGE, vec![MADE_UP_TS, EXPLICIT_VR_LE])]);
        let negotiated = options().negotiate(&rq).unwrap();
        assert_eq!(
            negotiated.presentation_contexts,
            vec![PresentationContext {
                id: 1,
                abstract_syntax: CT_IMAGE_STORAGE.to_string(),
                proposed_transfer_syntaxes: vec![MADE_UP_TS.to_string(), EXPLICIT_VR_LE.to_string()],
                transfer_syntax: Some(EXPLICIT_VR_LE.to_string()),
                result: PresentationContextResultReason::Acceptance,
            }]
        );
        assert_eq!(negotiated.requestor_max_pdu_length, 32_768);
        assert_eq!(
            negotiated.acknowledgement.presentation_contexts[0].transfer_syntax,
            EXPLICIT_VR_LE
        );
    }

    #[test]
    fn rejects_contexts_individually() {
        let rq = request(vec![
            (VERIFICATION, vec![IMPLICIT_VR_LE]),
            ("1.2.840.10008.5.1.4.1.2.2.1", vec![IMPLICIT_VR_LE]),
            (CT_IMAGE_STORAGE, vec![MADE_UP_TS]),
        ]);
        let negotiated = options().negotiate(&rq).unwrap();
        let results: Vec<_> = negotiated
            .presentation_contexts
            .iter()
            .map(|pc| pc.result)
            .collect();
        assert_eq!(
            results,
            vec![
                PresentationContextResultReason::Acceptance,
                PresentationContextResultReason::AbstractSyntaxNotSupported,
                PresentationContextResultReason::TransferSyntaxesNotSupported,
            ]
        );
    }

    #[test]
    fn rejects_association_without_acceptable_context() {
        let rq = request(vec![("1.2.840.10008.5.1.4.1.2.2.1", vec![IMPLICIT_VR_LE])]);
        assert_eq!(
            options().negotiate(&rq),
            Err(reject_by_user(AssociationRJServiceUserReason::NoReasonGiven))
        );
    }

    #[test]
    fn promiscuous_accepts_unknown_abstract_syntax() {
        let rq = request(vec![("1.2.840.10008.5.1.4.1.2.2.1", vec![IMPLICIT_VR_LE])]);
        let negotiated = options().promiscuous(true).negotiate(&rq).unwrap();
        assert!(negotiated.presentation_contexts[0].is_accepted());
    }

    #[test]
    fn rejects_bad_application_context() {
        let mut rq = request(vec![(VERIFICATION, vec![IMPLICIT_VR_LE])]);
        rq.application_context_name = "1.2.3".to_string();
        assert_eq!(
            options().negotiate(&rq),
            Err(reject_by_user(
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported
            ))
        );
    }

    #[test]
    fn rejects_unsupported_protocol_version() {
        let mut rq = request(vec![(VERIFICATION, vec![IMPLICIT_VR_LE])]);
        rq.protocol_version = 2;
        let rj = options().negotiate(&rq).unwrap_err();
        assert_eq!(
            rj.source,
            AssociationRJSource::ServiceProviderAsce(
                AssociationRJServiceProviderAsceReason::ProtocolVersionNotSupported
            )
        );
    }

    #[test]
    fn called_ae_title_policy() {
        let mut rq = request(vec![(VERIFICATION, vec![IMPLICIT_VR_LE])]);
        rq.called_ae_title = "SOMEONE-ELSE".to_string();
        assert!(options().negotiate(&rq).is_ok());
        assert_eq!(
            options()
                .called_ae_title_policy(CalledAeTitlePolicy::RequireOwn)
                .negotiate(&rq),
            Err(reject_by_user(
                AssociationRJServiceUserReason::CalledAeTitleNotRecognized
            ))
        );
    }

    #[test]
    fn zero_max_length_means_unlimited() {
        let mut rq = request(vec![(VERIFICATION, vec![IMPLICIT_VR_LE])]);
        rq.user_variables = vec![UserVariableItem::MaxLength(0)];
        let negotiated = options().negotiate(&rq).unwrap();
        assert_eq!(negotiated.requestor_max_pdu_length, u32::MAX);
    }
}
