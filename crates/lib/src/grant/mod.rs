//! Grants and their compilation into privileges
//!
//! A grant in the policy document binds an API name to a group of eligible
//! accounts and a privilege kind with parameters. Compilation runs per
//! eligible account in two stages:
//!
//! 1. [`resolve_grant`] substitutes the account's metadata into
//!    `common-name`, `allowed-names` and `contents`, parses `lifespan` and
//!    `is-host`, and looks up the referenced authority and scope group.
//! 2. [`Privilege::build`] checks the exact field set of the kind (forbidden
//!    fields first, then required ones) and binds a [`Privilege`].

mod errors;
pub mod privilege;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use errors::GrantError;
pub use privilege::{
    ApproveAdmission, BootstrapAccount, ConstructConfiguration, FetchKey, Impersonate, Privilege,
    PrivilegeKind, SignSsh, SignTls,
};

use crate::Result;
use crate::account::{Account, Group, substitute_vars};
use crate::authority::Authority;
use crate::config::GrantConfig;

/// The optional fields of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantField {
    Authority,
    Scope,
    IsHost,
    Lifespan,
    CommonName,
    AllowedNames,
    Contents,
}

impl GrantField {
    /// The field's name in the policy document.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantField::Authority => "authority",
            GrantField::Scope => "scope",
            GrantField::IsHost => "is-host",
            GrantField::Lifespan => "lifespan",
            GrantField::CommonName => "common-name",
            GrantField::AllowedNames => "allowed-names",
            GrantField::Contents => "contents",
        }
    }
}

impl fmt::Display for GrantField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grant after substitution and parsing, before its kind is checked.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGrant {
    pub api: String,
    pub authority: Option<Arc<Authority>>,
    pub scope: Option<Arc<Group>>,
    pub is_host: Option<bool>,
    pub lifespan: Option<Duration>,
    pub common_name: Option<String>,
    pub allowed_names: Option<Vec<String>>,
    pub contents: Option<String>,
}

impl ResolvedGrant {
    /// The fields that are set.
    pub fn present_fields(&self) -> Vec<GrantField> {
        [
            (GrantField::Authority, self.authority.is_some()),
            (GrantField::Scope, self.scope.is_some()),
            (GrantField::IsHost, self.is_host.is_some()),
            (GrantField::Lifespan, self.lifespan.is_some()),
            (GrantField::CommonName, self.common_name.is_some()),
            (GrantField::AllowedNames, self.allowed_names.is_some()),
            (GrantField::Contents, self.contents.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, present)| present.then_some(field))
        .collect()
    }
}

/// Everything grant compilation can refer to.
#[derive(Debug, Clone, Copy)]
pub struct CompileEnv<'a> {
    pub authorities: &'a HashMap<String, Arc<Authority>>,
    pub groups: &'a HashMap<String, Arc<Group>>,
    /// Whether an admission authority is configured.
    pub admission_enabled: bool,
}

/// Substitute `metadata` into a grant and parse its fields.
pub fn resolve_grant(
    config: &GrantConfig,
    metadata: &BTreeMap<String, String>,
    env: &CompileEnv<'_>,
) -> Result<ResolvedGrant> {
    let authority = match &config.authority {
        Some(name) => Some(Arc::clone(env.authorities.get(name).ok_or_else(|| {
            GrantError::UnknownAuthority { name: name.clone() }
        })?)),
        None => None,
    };
    let scope = match &config.scope {
        Some(name) => Some(Arc::clone(
            env.groups
                .get(name)
                .ok_or_else(|| GrantError::UnknownGroup { name: name.clone() })?,
        )),
        None => None,
    };

    Ok(ResolvedGrant {
        api: config.api.clone(),
        authority,
        scope,
        is_host: config.is_host.as_deref().map(parse_bool).transpose()?,
        lifespan: config.lifespan.as_deref().map(parse_duration).transpose()?,
        common_name: config
            .common_name
            .as_deref()
            .map(|cn| substitute_vars(cn, metadata))
            .transpose()?,
        allowed_names: config
            .allowed_names
            .as_ref()
            .map(|names| {
                names
                    .iter()
                    .map(|name| substitute_vars(name, metadata))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .transpose()?,
        contents: config
            .contents
            .as_deref()
            .map(|contents| substitute_vars(contents, metadata))
            .transpose()?,
    })
}

/// Compile one grant for one account.
pub fn compile_grant(
    config: &GrantConfig,
    metadata: &BTreeMap<String, String>,
    env: &CompileEnv<'_>,
) -> Result<Privilege> {
    let resolved = resolve_grant(config, metadata, env)?;
    let kind = PrivilegeKind::from_str(&config.privilege)?;
    Ok(Privilege::build(kind, resolved, env)?)
}

/// Check the parts of every grant that do not depend on an account: the
/// eligible group exists and the kind is known.
pub fn validate_grants(grants: &[GrantConfig], env: &CompileEnv<'_>) -> Result<()> {
    for grant in grants {
        if !env.groups.contains_key(&grant.group) {
            return Err(GrantError::UnknownGroup {
                name: grant.group.clone(),
            }
            .into());
        }
        PrivilegeKind::from_str(&grant.privilege)?;
    }
    Ok(())
}

/// Compile every grant the account is eligible for into its privilege map.
pub fn compile_privileges(
    account: &Account,
    grants: &[GrantConfig],
    env: &CompileEnv<'_>,
) -> Result<HashMap<String, Privilege>> {
    let mut privileges = HashMap::new();
    for grant in grants {
        let eligible = env
            .groups
            .get(&grant.group)
            .ok_or_else(|| GrantError::UnknownGroup {
                name: grant.group.clone(),
            })?;
        if !eligible.has_member(account.principal()) {
            continue;
        }
        if privileges.contains_key(&grant.api) {
            return Err(GrantError::DuplicateApi {
                principal: account.principal().to_string(),
                api: grant.api.clone(),
            }
            .into());
        }

        let privilege = compile_grant(grant, account.metadata(), env)?;
        tracing::debug!(
            principal = %account.principal(),
            api = %grant.api,
            kind = %privilege.kind(),
            "compiled privilege"
        );
        privileges.insert(grant.api.clone(), privilege);
    }
    Ok(privileges)
}

/// Parse a duration string: a sequence of decimal numbers, each with a unit
/// (`ns`, `us`, `ms`, `s`, `m`, `h`, `d`), such as `"1h30m"` or `"1.5s"`.
///
/// ```
/// use std::time::Duration;
/// use keyserver::grant::parse_duration;
///
/// assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert!(parse_duration("10").is_err());
/// ```
pub fn parse_duration(text: &str) -> std::result::Result<Duration, GrantError> {
    let invalid = |reason: &str| GrantError::InvalidField {
        field: "lifespan",
        value: text.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = text.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if trimmed.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut nanos: u128 = 0;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let multiplier: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "d" => 86_400 * 1_000_000_000,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid("malformed number"));
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("malformed number"))?
        };
        let fraction = &fraction[..fraction.len().min(18)];
        let fraction_value: u128 = if fraction.is_empty() {
            0
        } else {
            fraction.parse().map_err(|_| invalid("malformed number"))?
        };
        let scale = 10u128.pow(fraction.len() as u32);

        let part = whole
            .checked_mul(multiplier)
            .and_then(|w| w.checked_add(fraction_value * multiplier / scale))
            .ok_or_else(|| invalid("overflow"))?;
        nanos = nanos.checked_add(part).ok_or_else(|| invalid("overflow"))?;
        rest = tail;
    }

    let secs = u64::try_from(nanos / 1_000_000_000).map_err(|_| invalid("overflow"))?;
    Ok(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

/// Parse a boolean string.
pub fn parse_bool(text: &str) -> std::result::Result<bool, GrantError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(GrantError::InvalidField {
            field: "is-host",
            value: text.to_string(),
            reason: "not a boolean".to_string(),
        }),
    }
}
