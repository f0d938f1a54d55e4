//! Compiled privileges
//!
//! Each privilege kind is a small struct holding exactly the bindings its
//! grant resolved to, and [`Privilege`] is the closed set of them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{CompileEnv, GrantError, GrantField, ResolvedGrant};
use crate::Result;
use crate::account::Group;
use crate::authority::{Authority, AuthorityKind};
use crate::context::OperationContext;

/// The known privilege kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivilegeKind {
    BootstrapAccount,
    SignSsh,
    SignTls,
    Impersonate,
    ConstructConfiguration,
    FetchKey,
    ApproveAdmission,
}

impl PrivilegeKind {
    pub const ALL: [PrivilegeKind; 7] = [
        PrivilegeKind::BootstrapAccount,
        PrivilegeKind::SignSsh,
        PrivilegeKind::SignTls,
        PrivilegeKind::Impersonate,
        PrivilegeKind::ConstructConfiguration,
        PrivilegeKind::FetchKey,
        PrivilegeKind::ApproveAdmission,
    ];

    /// The kind's name in the policy document.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeKind::BootstrapAccount => "bootstrap-account",
            PrivilegeKind::SignSsh => "sign-ssh",
            PrivilegeKind::SignTls => "sign-tls",
            PrivilegeKind::Impersonate => "impersonate",
            PrivilegeKind::ConstructConfiguration => "construct-configuration",
            PrivilegeKind::FetchKey => "fetch-key",
            PrivilegeKind::ApproveAdmission => "approve-admission",
        }
    }

    /// Fields a grant of this kind must set.
    pub fn required(&self) -> &'static [GrantField] {
        const SCOPE: GrantField = GrantField::Scope;
        const AUTHORITY: GrantField = GrantField::Authority;
        const LIFESPAN: GrantField = GrantField::Lifespan;
        const COMMON_NAME: GrantField = GrantField::CommonName;
        const ALLOWED_NAMES: GrantField = GrantField::AllowedNames;
        const CONTENTS: GrantField = GrantField::Contents;
        match self {
            PrivilegeKind::BootstrapAccount => &[SCOPE, LIFESPAN],
            PrivilegeKind::SignSsh => &[AUTHORITY, LIFESPAN, COMMON_NAME, ALLOWED_NAMES],
            PrivilegeKind::SignTls => &[AUTHORITY, LIFESPAN, COMMON_NAME],
            PrivilegeKind::Impersonate => &[SCOPE],
            PrivilegeKind::ConstructConfiguration => &[CONTENTS],
            PrivilegeKind::FetchKey => &[AUTHORITY],
            PrivilegeKind::ApproveAdmission => &[SCOPE],
        }
    }

    /// Fields a grant of this kind must not set.
    pub fn forbidden(&self) -> &'static [GrantField] {
        const SCOPE: GrantField = GrantField::Scope;
        const AUTHORITY: GrantField = GrantField::Authority;
        const LIFESPAN: GrantField = GrantField::Lifespan;
        const COMMON_NAME: GrantField = GrantField::CommonName;
        const ALLOWED_NAMES: GrantField = GrantField::AllowedNames;
        const CONTENTS: GrantField = GrantField::Contents;
        match self {
            PrivilegeKind::BootstrapAccount => &[AUTHORITY, COMMON_NAME, ALLOWED_NAMES, CONTENTS],
            PrivilegeKind::SignSsh | PrivilegeKind::SignTls => &[SCOPE, CONTENTS],
            PrivilegeKind::Impersonate | PrivilegeKind::ApproveAdmission => {
                &[AUTHORITY, COMMON_NAME, ALLOWED_NAMES, LIFESPAN, CONTENTS]
            }
            PrivilegeKind::ConstructConfiguration => {
                &[SCOPE, COMMON_NAME, ALLOWED_NAMES, LIFESPAN, AUTHORITY]
            }
            PrivilegeKind::FetchKey => &[SCOPE, COMMON_NAME, ALLOWED_NAMES, LIFESPAN, CONTENTS],
        }
    }

    /// Whether `is-host` means anything to this kind.
    pub fn uses_is_host(&self) -> bool {
        matches!(self, PrivilegeKind::SignSsh | PrivilegeKind::SignTls)
    }

    /// Check a resolved grant's field set against this kind.
    ///
    /// Forbidden fields are reported before missing ones.
    pub fn validate(&self, resolved: &ResolvedGrant) -> std::result::Result<(), GrantError> {
        let present = resolved.present_fields();

        let extraneous: Vec<&'static str> = self
            .forbidden()
            .iter()
            .filter(|field| present.contains(*field))
            .map(GrantField::as_str)
            .collect();
        if !extraneous.is_empty() {
            return Err(GrantError::ExtraneousParameters {
                kind: self.as_str(),
                fields: extraneous,
            });
        }

        let missing: Vec<&'static str> = self
            .required()
            .iter()
            .filter(|field| !present.contains(*field))
            .map(GrantField::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(GrantError::MissingParameters {
                kind: self.as_str(),
                fields: missing,
            });
        }

        if resolved.is_host.is_some() && !self.uses_is_host() {
            tracing::warn!(
                api = %resolved.api,
                kind = %self,
                "is-host has no effect on this privilege kind"
            );
        }
        Ok(())
    }
}

impl fmt::Display for PrivilegeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivilegeKind {
    type Err = GrantError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PrivilegeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GrantError::UnknownKind {
                kind: s.to_string(),
            })
    }
}

/// Grants a one-time token for any principal in `scope`.
#[derive(Debug)]
pub struct BootstrapAccount {
    scope: Arc<Group>,
    lifespan: Duration,
}

impl BootstrapAccount {
    fn invoke(&self, op: &mut OperationContext<'_>, body: &str) -> Result<String> {
        let principal = body.trim();
        check_scope(&self.scope, principal)?;
        Ok(op.context().tokens().grant_token(principal, self.lifespan))
    }
}

/// Signs an SSH public key with a fixed key id and principals.
#[derive(Debug)]
pub struct SignSsh {
    authority: Arc<Authority>,
    is_host: bool,
    lifespan: Duration,
    common_name: String,
    allowed_names: Vec<String>,
}

impl SignSsh {
    fn invoke(&self, body: &str) -> Result<String> {
        Ok(self.authority.sign(
            body,
            self.is_host,
            self.lifespan,
            &self.common_name,
            &self.allowed_names,
        )?)
    }
}

/// Signs a TLS certificate signing request with a fixed subject.
#[derive(Debug)]
pub struct SignTls {
    authority: Arc<Authority>,
    is_host: bool,
    lifespan: Duration,
    common_name: String,
    allowed_names: Vec<String>,
}

impl SignTls {
    fn invoke(&self, body: &str) -> Result<String> {
        Ok(self.authority.sign(
            body,
            self.is_host,
            self.lifespan,
            &self.common_name,
            &self.allowed_names,
        )?)
    }
}

/// Switches the operation to another account in `scope`.
#[derive(Debug)]
pub struct Impersonate {
    scope: Arc<Group>,
}

impl Impersonate {
    fn invoke(&self, op: &mut OperationContext<'_>, body: &str) -> Result<String> {
        let principal = body.trim();
        check_scope(&self.scope, principal)?;

        let account = op.context().account(principal)?;
        if account.principal() != principal {
            return Err(GrantError::InconsistentAccount {
                requested: principal.to_string(),
                returned: account.principal().to_string(),
            }
            .into());
        }

        tracing::info!(
            from = %op.account().principal(),
            to = %principal,
            "impersonating account"
        );
        op.set_account(account);
        Ok(String::new())
    }
}

/// Returns a rendered configuration string.
#[derive(Debug)]
pub struct ConstructConfiguration {
    contents: String,
}

impl ConstructConfiguration {
    fn invoke(&self, body: &str) -> Result<String> {
        require_empty_body(PrivilegeKind::ConstructConfiguration, body)?;
        Ok(self.contents.clone())
    }
}

/// Returns the key material of a static authority.
#[derive(Debug)]
pub struct FetchKey {
    authority: Arc<Authority>,
}

impl FetchKey {
    fn invoke(&self, body: &str) -> Result<String> {
        require_empty_body(PrivilegeKind::FetchKey, body)?;
        let key = self.authority.key_material().ok_or_else(|| GrantError::WrongAuthorityKind {
            kind: PrivilegeKind::FetchKey.as_str(),
            name: self.authority.name().to_string(),
            expected: AuthorityKind::Static,
            actual: self.authority.kind(),
        })?;
        let text = std::str::from_utf8(key).map_err(|_| GrantError::KeyMaterialNotText {
            name: self.authority.name().to_string(),
        })?;
        Ok(text.to_string())
    }
}

/// Approves an admission fingerprint for a principal in `scope`.
#[derive(Debug)]
pub struct ApproveAdmission {
    scope: Arc<Group>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ApprovalRequest {
    fingerprint: String,
    principal: String,
}

impl ApproveAdmission {
    fn invoke(&self, op: &mut OperationContext<'_>, body: &str) -> Result<String> {
        let request: ApprovalRequest =
            serde_json::from_str(body).map_err(|e| GrantError::InvalidBody {
                kind: PrivilegeKind::ApproveAdmission.as_str(),
                reason: e.to_string(),
            })?;
        check_scope(&self.scope, &request.principal)?;

        let fingerprint = op
            .context()
            .admission()?
            .approve(&request.fingerprint, &request.principal)?;
        tracing::info!(
            approver = %op.account().principal(),
            principal = %request.principal,
            fingerprint = %fingerprint,
            "approved admission"
        );
        Ok(fingerprint)
    }
}

/// A compiled, executable grant.
#[derive(Debug)]
pub enum Privilege {
    BootstrapAccount(BootstrapAccount),
    SignSsh(SignSsh),
    SignTls(SignTls),
    Impersonate(Impersonate),
    ConstructConfiguration(ConstructConfiguration),
    FetchKey(FetchKey),
    ApproveAdmission(ApproveAdmission),
}

impl Privilege {
    /// Validate a resolved grant against `kind` and bind the privilege.
    pub fn build(
        kind: PrivilegeKind,
        resolved: ResolvedGrant,
        env: &CompileEnv<'_>,
    ) -> std::result::Result<Self, GrantError> {
        kind.validate(&resolved)?;

        let privilege = match kind {
            PrivilegeKind::BootstrapAccount => Privilege::BootstrapAccount(BootstrapAccount {
                scope: required(kind, GrantField::Scope, resolved.scope)?,
                lifespan: required(kind, GrantField::Lifespan, resolved.lifespan)?,
            }),
            PrivilegeKind::SignSsh => {
                let authority = required(kind, GrantField::Authority, resolved.authority)?;
                check_authority_kind(kind, &authority, AuthorityKind::Ssh)?;
                let allowed_names =
                    required(kind, GrantField::AllowedNames, resolved.allowed_names)?;
                if allowed_names.is_empty() {
                    return Err(GrantError::InvalidField {
                        field: GrantField::AllowedNames.as_str(),
                        value: "[]".to_string(),
                        reason: "SSH certificates need at least one principal".to_string(),
                    });
                }
                Privilege::SignSsh(SignSsh {
                    authority,
                    is_host: resolved.is_host.unwrap_or(false),
                    lifespan: required(kind, GrantField::Lifespan, resolved.lifespan)?,
                    common_name: required(kind, GrantField::CommonName, resolved.common_name)?,
                    allowed_names,
                })
            }
            PrivilegeKind::SignTls => {
                let authority = required(kind, GrantField::Authority, resolved.authority)?;
                check_authority_kind(kind, &authority, AuthorityKind::Tls)?;
                Privilege::SignTls(SignTls {
                    authority,
                    is_host: resolved.is_host.unwrap_or(false),
                    lifespan: required(kind, GrantField::Lifespan, resolved.lifespan)?,
                    common_name: required(kind, GrantField::CommonName, resolved.common_name)?,
                    allowed_names: resolved.allowed_names.unwrap_or_default(),
                })
            }
            PrivilegeKind::Impersonate => Privilege::Impersonate(Impersonate {
                scope: required(kind, GrantField::Scope, resolved.scope)?,
            }),
            PrivilegeKind::ConstructConfiguration => {
                Privilege::ConstructConfiguration(ConstructConfiguration {
                    contents: required(kind, GrantField::Contents, resolved.contents)?,
                })
            }
            PrivilegeKind::FetchKey => {
                let authority = required(kind, GrantField::Authority, resolved.authority)?;
                check_authority_kind(kind, &authority, AuthorityKind::Static)?;
                Privilege::FetchKey(FetchKey { authority })
            }
            PrivilegeKind::ApproveAdmission => {
                if !env.admission_enabled {
                    return Err(GrantError::AdmissionDisabled);
                }
                Privilege::ApproveAdmission(ApproveAdmission {
                    scope: required(kind, GrantField::Scope, resolved.scope)?,
                })
            }
        };
        Ok(privilege)
    }

    pub fn kind(&self) -> PrivilegeKind {
        match self {
            Privilege::BootstrapAccount(_) => PrivilegeKind::BootstrapAccount,
            Privilege::SignSsh(_) => PrivilegeKind::SignSsh,
            Privilege::SignTls(_) => PrivilegeKind::SignTls,
            Privilege::Impersonate(_) => PrivilegeKind::Impersonate,
            Privilege::ConstructConfiguration(_) => PrivilegeKind::ConstructConfiguration,
            Privilege::FetchKey(_) => PrivilegeKind::FetchKey,
            Privilege::ApproveAdmission(_) => PrivilegeKind::ApproveAdmission,
        }
    }

    /// Run the privilege against a request body.
    pub fn invoke(&self, op: &mut OperationContext<'_>, body: &str) -> Result<String> {
        match self {
            Privilege::BootstrapAccount(p) => p.invoke(op, body),
            Privilege::SignSsh(p) => p.invoke(body),
            Privilege::SignTls(p) => p.invoke(body),
            Privilege::Impersonate(p) => p.invoke(op, body),
            Privilege::ConstructConfiguration(p) => p.invoke(body),
            Privilege::FetchKey(p) => p.invoke(body),
            Privilege::ApproveAdmission(p) => p.invoke(op, body),
        }
    }
}

fn required<T>(
    kind: PrivilegeKind,
    field: GrantField,
    value: Option<T>,
) -> std::result::Result<T, GrantError> {
    value.ok_or_else(|| GrantError::MissingParameters {
        kind: kind.as_str(),
        fields: vec![field.as_str()],
    })
}

fn check_authority_kind(
    kind: PrivilegeKind,
    authority: &Authority,
    expected: AuthorityKind,
) -> std::result::Result<(), GrantError> {
    if authority.kind() != expected {
        return Err(GrantError::WrongAuthorityKind {
            kind: kind.as_str(),
            name: authority.name().to_string(),
            expected,
            actual: authority.kind(),
        });
    }
    Ok(())
}

fn check_scope(scope: &Group, principal: &str) -> std::result::Result<(), GrantError> {
    if !scope.has_member(principal) {
        return Err(GrantError::OutOfScope {
            principal: principal.to_string(),
            scope: scope.name().to_string(),
        });
    }
    Ok(())
}

fn require_empty_body(kind: PrivilegeKind, body: &str) -> std::result::Result<(), GrantError> {
    if !body.is_empty() {
        return Err(GrantError::InvalidBody {
            kind: kind.as_str(),
            reason: "body must be empty".to_string(),
        });
    }
    Ok(())
}
