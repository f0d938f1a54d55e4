//! Error types for grant compilation and privilege invocation.

use thiserror::Error as ThisError;

use crate::Error;
use crate::authority::AuthorityKind;

/// Errors raised while compiling a grant into a privilege or invoking one.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum GrantError {
    /// The privilege kind is not one of the known kinds.
    #[error("no such privilege kind: {kind}")]
    UnknownKind { kind: String },

    /// Fields the kind does not accept were set.
    #[error("extraneous parameter(s) {fields:?} for privilege kind {kind}")]
    ExtraneousParameters {
        kind: &'static str,
        fields: Vec<&'static str>,
    },

    /// Fields the kind requires were not set.
    #[error("missing parameter(s) {fields:?} for privilege kind {kind}")]
    MissingParameters {
        kind: &'static str,
        fields: Vec<&'static str>,
    },

    /// A field value failed to parse.
    #[error("invalid {field} {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// The grant names an authority that does not exist.
    #[error("no such authority: {name}")]
    UnknownAuthority { name: String },

    /// The grant names an authority of the wrong kind.
    #[error("privilege kind {kind} needs a {expected} authority, {name} is {actual}")]
    WrongAuthorityKind {
        kind: &'static str,
        name: String,
        expected: AuthorityKind,
        actual: AuthorityKind,
    },

    /// The grant's scope or eligible group does not exist.
    #[error("no such group: {name}")]
    UnknownGroup { name: String },

    /// Two grants expose the same API name to one account.
    #[error("account {principal} has API {api} granted twice")]
    DuplicateApi { principal: String, api: String },

    /// An approve-admission grant exists but admission is not configured.
    #[error("privilege kind approve-admission requires an admission authority")]
    AdmissionDisabled,

    /// The request body was not what the privilege expects.
    #[error("invalid request body for {kind}: {reason}")]
    InvalidBody { kind: &'static str, reason: String },

    /// Static key material is not valid UTF-8 and cannot be returned as text.
    #[error("key material of authority {name} is not UTF-8 text")]
    KeyMaterialNotText { name: String },

    /// The requested principal lies outside the privilege's scope.
    #[error("principal {principal} is outside scope {scope}")]
    OutOfScope { principal: String, scope: String },

    /// Account lookup returned an account for a different principal.
    #[error("account lookup for {requested} returned {returned}")]
    InconsistentAccount { requested: String, returned: String },
}

impl GrantError {
    /// Check if this error is an authorization refusal.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, GrantError::OutOfScope { .. })
    }

    /// Check if this error was raised while compiling the policy.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            GrantError::UnknownKind { .. }
                | GrantError::ExtraneousParameters { .. }
                | GrantError::MissingParameters { .. }
                | GrantError::InvalidField { .. }
                | GrantError::UnknownAuthority { .. }
                | GrantError::WrongAuthorityKind { .. }
                | GrantError::UnknownGroup { .. }
                | GrantError::DuplicateApi { .. }
                | GrantError::AdmissionDisabled
        )
    }

    /// Check if this error references something undefined.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GrantError::UnknownKind { .. }
                | GrantError::UnknownAuthority { .. }
                | GrantError::UnknownGroup { .. }
        )
    }

    pub fn is_missing_parameters(&self) -> bool {
        matches!(self, GrantError::MissingParameters { .. })
    }

    pub fn is_extraneous_parameters(&self) -> bool {
        matches!(self, GrantError::ExtraneousParameters { .. })
    }

    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, GrantError::UnknownKind { .. })
    }
}

impl From<GrantError> for Error {
    fn from(err: GrantError) -> Self {
        Error::Grant(err)
    }
}
