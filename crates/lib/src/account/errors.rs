//! Error types for account and group compilation.

use thiserror::Error as ThisError;

use crate::Error;

/// Errors raised while compiling groups and accounts or substituting
/// metadata variables.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum AccountError {
    /// Two groups share a name.
    #[error("Duplicate group: {name}")]
    DuplicateGroup { name: String },

    /// A group names a parent that does not exist.
    #[error("Group {group} is a subgroup of unknown group {parent}")]
    UnknownParentGroup { group: String, parent: String },

    /// Following parent links from a group leads back to it.
    #[error("Group {group} is its own ancestor")]
    GroupCycle { group: String },

    /// Two accounts share a principal.
    #[error("Duplicate principal: {principal}")]
    DuplicatePrincipal { principal: String },

    /// An account or grant names a group that does not exist.
    #[error("No such group: {group}")]
    UnknownGroup { group: String },

    /// An IP-limited account has no `ip` metadata entry.
    #[error("Account {principal} limits IP but has no ip metadata")]
    MissingIpMetadata { principal: String },

    /// The `ip` metadata entry does not parse as an address.
    #[error("Account {principal} has invalid ip metadata: {value}")]
    InvalidIp { principal: String, value: String },

    /// The account's `principal` metadata disagrees with its principal.
    #[error("Account {principal} overrides principal metadata with {value}")]
    ConflictingPrincipalMetadata { principal: String, value: String },

    /// A principal was added twice along one ancestor chain.
    #[error("Principal {principal} already present in group {group}")]
    MembershipCycle { principal: String, group: String },

    /// A referenced metadata variable is unset or empty.
    #[error("Variable ({name}) is unset in {template:?}")]
    UnsetVariable { name: String, template: String },

    /// A `(` without its matching `)`.
    #[error("Unbalanced parenthesis in {template:?}")]
    UnbalancedParenthesis { template: String },

    /// A `)` without a preceding `(`.
    #[error("Extraneous parenthesis in {template:?}")]
    ExtraneousParenthesis { template: String },
}

impl AccountError {
    /// Check if this error references an undefined group.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AccountError::UnknownGroup { .. } | AccountError::UnknownParentGroup { .. }
        )
    }

    /// Check if this error reports a cycle in groups or membership.
    pub fn is_cycle(&self) -> bool {
        matches!(
            self,
            AccountError::GroupCycle { .. } | AccountError::MembershipCycle { .. }
        )
    }

    /// Check if this error came from variable substitution.
    pub fn is_substitution_error(&self) -> bool {
        matches!(
            self,
            AccountError::UnsetVariable { .. }
                | AccountError::UnbalancedParenthesis { .. }
                | AccountError::ExtraneousParenthesis { .. }
        )
    }
}

impl From<AccountError> for Error {
    fn from(err: AccountError) -> Self {
        Error::Account(err)
    }
}
