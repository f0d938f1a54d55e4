//! Error types for node admission.

use std::net::IpAddr;

use thiserror::Error as ThisError;

use crate::Error;
use crate::authority::AuthorityError;

/// Errors raised by the admission protocol.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum AdmitError {
    /// The source address is not on the admission allow-list.
    #[error("No account is bound to address {ip}")]
    UnknownSource { ip: IpAddr },

    /// The request could not be parsed or its signature did not verify.
    #[error("Invalid admission request: {reason}")]
    InvalidRequest { reason: String },

    /// The request's key is not RSA.
    #[error("Admission requires an RSA key")]
    NotRsa,

    /// The request's key is too small.
    #[error("RSA key of {bits} bits is too weak, need at least {minimum}")]
    WeakKey { bits: usize, minimum: usize },

    /// A fingerprint is not a well-formed word sequence.
    #[error("Invalid fingerprint {fingerprint:?}: {reason}")]
    InvalidFingerprint { fingerprint: String, reason: String },

    /// No operator has approved this fingerprint.
    #[error("Fingerprint {fingerprint} has not been approved")]
    NotApproved { fingerprint: String },

    /// The approval window has passed.
    #[error("Approval of fingerprint {fingerprint} has expired")]
    ApprovalExpired { fingerprint: String },

    /// The fingerprint was approved for a different principal than the one
    /// presenting it.
    #[error("Fingerprint approved for {approved} but presented by {seen}")]
    PrincipalMismatch { seen: String, approved: String },

    /// The admission authority failed to sign.
    #[error(transparent)]
    Signing(#[from] AuthorityError),
}

impl AdmitError {
    /// Check if this error reports an expired approval.
    pub fn is_expired(&self) -> bool {
        matches!(self, AdmitError::ApprovalExpired { .. })
    }

    /// Check if this error is a key or request parsing failure.
    pub fn is_crypto_error(&self) -> bool {
        match self {
            AdmitError::InvalidRequest { .. } | AdmitError::NotRsa | AdmitError::WeakKey { .. } => {
                true
            }
            AdmitError::Signing(err) => err.is_crypto_error(),
            _ => false,
        }
    }

    /// Check if the request is waiting on, or contradicts, an operator approval.
    pub fn is_unapproved(&self) -> bool {
        matches!(
            self,
            AdmitError::NotApproved { .. }
                | AdmitError::ApprovalExpired { .. }
                | AdmitError::PrincipalMismatch { .. }
        )
    }

    pub fn is_principal_mismatch(&self) -> bool {
        matches!(self, AdmitError::PrincipalMismatch { .. })
    }
}

impl From<AdmitError> for Error {
    fn from(err: AdmitError) -> Self {
        Error::Admit(err)
    }
}
