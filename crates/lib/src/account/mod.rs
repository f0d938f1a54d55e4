//! Accounts and groups
//!
//! Groups form a tree through `subgroup-of` links. They are kept in a
//! [`GroupSet`] arena keyed by name, with each group storing its parent's name.
//! Compiling accounts appends each principal to its own group and every
//! ancestor, so [`Group::all_members`] is the transitive membership in
//! registration order.

mod errors;
pub mod vars;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

pub use errors::AccountError;
pub use vars::substitute_vars;

use crate::config::{AccountConfig, GroupConfig};
use crate::constants::{IP_METADATA_KEY, PRINCIPAL_METADATA_KEY};
use crate::grant::Privilege;

/// A named set of principals with an optional parent group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    name: String,
    parent: Option<String>,
    members: Vec<String>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the group this one is a subgroup of.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Every principal in this group or any of its subgroups, in the order the
    /// accounts were compiled.
    pub fn all_members(&self) -> &[String] {
        &self.members
    }

    pub fn has_member(&self, principal: &str) -> bool {
        self.members.iter().any(|m| m == principal)
    }
}

/// Arena of groups indexed by name.
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    groups: HashMap<String, Group>,
}

impl GroupSet {
    pub fn get(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// The named group followed by its ancestors, nearest first.
    pub fn ancestors(&self, name: &str) -> Result<Vec<&Group>, AccountError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(name);

        while let Some(current) = next {
            if !seen.insert(current) {
                return Err(AccountError::GroupCycle {
                    group: name.to_string(),
                });
            }
            let group = self
                .groups
                .get(current)
                .ok_or_else(|| AccountError::UnknownGroup {
                    group: current.to_string(),
                })?;
            chain.push(group);
            next = group.parent();
        }
        Ok(chain)
    }

    /// Consume the arena, yielding its groups.
    pub fn into_groups(self) -> impl Iterator<Item = Group> {
        self.groups.into_values()
    }
}

/// Build the group arena.
///
/// Every parent must itself be a listed group, and no group may be its own
/// ancestor.
pub fn compile_groups(configs: &[GroupConfig]) -> Result<GroupSet, AccountError> {
    let mut set = GroupSet::default();
    for config in configs {
        if set.groups.contains_key(&config.name) {
            return Err(AccountError::DuplicateGroup {
                name: config.name.clone(),
            });
        }
        set.groups.insert(
            config.name.clone(),
            Group {
                name: config.name.clone(),
                parent: None,
                members: Vec::new(),
            },
        );
    }

    for config in configs {
        if let Some(parent) = &config.subgroup_of {
            if !set.groups.contains_key(parent) {
                return Err(AccountError::UnknownParentGroup {
                    group: config.name.clone(),
                    parent: parent.clone(),
                });
            }
            if let Some(group) = set.groups.get_mut(&config.name) {
                group.parent = Some(parent.clone());
            }
        }
    }

    for config in configs {
        set.ancestors(&config.name)?;
    }

    tracing::debug!(groups = set.len(), "compiled groups");
    Ok(set)
}

/// A principal together with its metadata and compiled privileges.
#[derive(Debug)]
pub struct Account {
    principal: String,
    group: String,
    disable_direct_auth: bool,
    metadata: BTreeMap<String, String>,
    limit_ip: Option<IpAddr>,
    privileges: HashMap<String, Privilege>,
}

impl Account {
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Name of the group the account was declared in.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// True when the account may only be reached through impersonation.
    pub fn disable_direct_auth(&self) -> bool {
        self.disable_direct_auth
    }

    /// Metadata used for variable substitution; always contains `principal`.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// The only source address this account may authenticate from, if any.
    pub fn limit_ip(&self) -> Option<IpAddr> {
        self.limit_ip
    }

    pub fn privilege(&self, api: &str) -> Option<&Privilege> {
        self.privileges.get(api)
    }

    /// API names available to this account, sorted.
    pub fn api_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.privileges.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn set_privileges(&mut self, privileges: HashMap<String, Privilege>) {
        self.privileges = privileges;
    }
}

/// Build accounts and record their membership in `groups`.
///
/// Returned accounts carry no privileges yet; those are compiled once every
/// group's membership is final.
pub fn compile_accounts(
    configs: &[AccountConfig],
    groups: &mut GroupSet,
) -> Result<Vec<Account>, AccountError> {
    let mut principals = HashSet::new();
    let mut accounts = Vec::with_capacity(configs.len());

    for config in configs {
        if !principals.insert(config.principal.as_str()) {
            return Err(AccountError::DuplicatePrincipal {
                principal: config.principal.clone(),
            });
        }

        let chain: Vec<String> = groups
            .ancestors(&config.group)?
            .into_iter()
            .map(|g| g.name.clone())
            .collect();

        let mut metadata = config.metadata.clone();
        match metadata.get(PRINCIPAL_METADATA_KEY) {
            Some(value) if value != &config.principal => {
                return Err(AccountError::ConflictingPrincipalMetadata {
                    principal: config.principal.clone(),
                    value: value.clone(),
                });
            }
            _ => {
                metadata.insert(
                    PRINCIPAL_METADATA_KEY.to_string(),
                    config.principal.clone(),
                );
            }
        }

        let limit_ip = if config.limit_ip {
            let value = metadata.get(IP_METADATA_KEY).ok_or_else(|| {
                AccountError::MissingIpMetadata {
                    principal: config.principal.clone(),
                }
            })?;
            let ip = value.parse().map_err(|_| AccountError::InvalidIp {
                principal: config.principal.clone(),
                value: value.clone(),
            })?;
            Some(ip)
        } else {
            None
        };

        for name in &chain {
            if let Some(group) = groups.groups.get_mut(name) {
                if group.has_member(&config.principal) {
                    return Err(AccountError::MembershipCycle {
                        principal: config.principal.clone(),
                        group: name.clone(),
                    });
                }
                group.members.push(config.principal.clone());
            }
        }

        accounts.push(Account {
            principal: config.principal.clone(),
            group: config.group.clone(),
            disable_direct_auth: config.disable_direct_auth,
            metadata,
            limit_ip,
            privileges: HashMap::new(),
        });
    }

    tracing::debug!(accounts = accounts.len(), "compiled accounts");
    Ok(accounts)
}
