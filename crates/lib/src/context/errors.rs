//! Error types for authentication and request dispatch.

use std::net::IpAddr;

use thiserror::Error as ThisError;

use crate::Error;

/// Errors raised while authenticating a caller or dispatching its requests.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum ContextError {
    /// The current account holds no privilege for the requested API.
    #[error("Operation forbidden: {principal} may not call {api}")]
    OperationForbidden { principal: String, api: String },

    /// No account has this principal.
    #[error("No such account: {principal}")]
    UnknownAccount { principal: String },

    /// The request carried neither a certificate chain nor a token.
    #[error("No credentials presented")]
    NoCredentials,

    /// The account may only be reached through impersonation.
    #[error("Account {principal} may not authenticate directly")]
    DirectAuthDisabled { principal: String },

    /// The account is bound to another source address.
    #[error("Account {principal} may not authenticate from {source_ip:?}")]
    IpMismatch {
        principal: String,
        source_ip: Option<IpAddr>,
    },

    /// A certificate in the presented chain is not valid PEM.
    #[error("Invalid client certificate: {reason}")]
    InvalidCertificate { reason: String },

    /// No admission authority is configured.
    #[error("Admission is not enabled")]
    AdmissionDisabled,

    /// No server certificate is configured.
    #[error("Server TLS is not configured")]
    ServerTlsDisabled,

    /// No authority has this name.
    #[error("No such authority: {name}")]
    UnknownAuthority { name: String },

    /// No static file has this name.
    #[error("No such static file: {name}")]
    UnknownStaticFile { name: String },
}

impl ContextError {
    /// Check if this error is an explicit authorization refusal.
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            ContextError::OperationForbidden { .. }
                | ContextError::DirectAuthDisabled { .. }
                | ContextError::IpMismatch { .. }
        )
    }

    /// Check if this error names something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ContextError::UnknownAccount { .. }
                | ContextError::UnknownAuthority { .. }
                | ContextError::UnknownStaticFile { .. }
        )
    }

    /// Check if this error is authentication-related.
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            ContextError::NoCredentials
                | ContextError::DirectAuthDisabled { .. }
                | ContextError::IpMismatch { .. }
                | ContextError::InvalidCertificate { .. }
        )
    }
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        Error::Context(err)
    }
}
