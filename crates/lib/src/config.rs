//! Policy document
//!
//! The keyserver is driven by one JSON document describing its authorities,
//! accounts, groups and grants. Field names are kebab-case. Key and
//! certificate paths that are relative resolve against the directory holding
//! the document.
//!
//! ```
//! use keyserver::config::Config;
//!
//! let config = Config::from_json(
//!     r#"{
//!         "authentication-authority": "clustertls",
//!         "groups": [{"name": "root"}],
//!         "accounts": [{"principal": "admin", "group": "root"}]
//!     }"#,
//!     std::path::Path::new("/etc/keyserver"),
//! )
//! .unwrap();
//! assert_eq!(config.accounts[0].principal, "admin");
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::Error;
use crate::authority::AuthorityKind;

/// The complete policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// TLS authority whose client certificates authenticate callers.
    pub authentication_authority: String,
    /// TLS authority that signs certificates for newly admitted nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_authority: Option<String>,
    /// The server's own certificate, issued from one of the TLS authorities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_tls: Option<ServerTlsConfig>,
    /// Files served verbatim and unauthenticated, by name.
    #[serde(default)]
    pub static_files: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub authorities: Vec<AuthorityConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

/// An authority and the files it loads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AuthorityConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AuthorityKind,
    /// Private key (PEM) or, for static authorities, the secret material.
    pub key: PathBuf,
    /// Certificate (TLS), authorized-key line (SSH) or public part (static).
    pub cert: PathBuf,
}

/// Parameters of the server's own TLS certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerTlsConfig {
    pub authority: String,
    pub principal: String,
    #[serde(default)]
    pub names: Vec<String>,
    /// Duration string, e.g. `"24h"`.
    pub lifespan: String,
    /// Duration string; renew once the certificate is this close to expiry.
    pub renew_margin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AccountConfig {
    pub principal: String,
    pub group: String,
    #[serde(default)]
    pub disable_direct_auth: bool,
    /// Restrict authentication to the address in the `ip` metadata entry.
    #[serde(default)]
    pub limit_ip: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgroup_of: Option<String>,
}

/// A grant as written in the policy document, before substitution and
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GrantConfig {
    /// API name the privilege is exposed under.
    pub api: String,
    /// Accounts in this group (transitively) receive the privilege.
    pub group: String,
    /// Privilege kind, e.g. `sign-tls`.
    pub privilege: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Boolean string (`"true"`, `"false"`, `"yes"`, `"no"`, `"1"`, `"0"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_host: Option<String>,
    /// Duration string, e.g. `"1h30m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifespan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

/// Errors raised while loading or validating the policy document.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// The document could not be read.
    #[error("Failed to read configuration {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON for the expected schema.
    #[error("Failed to parse configuration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Two authorities share a name.
    #[error("Duplicate authority: {name}")]
    DuplicateAuthority { name: String },

    /// A referenced authority is not defined.
    #[error("No such authority: {name}")]
    UnknownAuthority { name: String },

    /// A referenced authority has the wrong kind for its use.
    #[error("Authority {name} must be of type {expected}")]
    WrongAuthorityKind { name: String, expected: AuthorityKind },

    /// A static file could not be loaded.
    #[error("Failed to read static file {name} from {path}")]
    StaticFile {
        name: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A value in the document failed to parse.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, ConfigError::Io { .. } | ConfigError::StaticFile { .. })
    }

    /// Check if this error references something undefined.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::UnknownAuthority { .. })
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl Config {
    /// Load a policy document from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = Self::parse(&text, base).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        tracing::debug!(
            path = %path.display(),
            authorities = config.authorities.len(),
            accounts = config.accounts.len(),
            grants = config.grants.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    /// Parse a policy document, resolving relative paths against `base`.
    pub fn from_json(text: &str, base: &Path) -> Result<Self, ConfigError> {
        Self::parse(text, base).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    fn parse(text: &str, base: &Path) -> Result<Self, serde_json::Error> {
        let mut config: Config = serde_json::from_str(text)?;
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        for authority in &mut self.authorities {
            resolve(&mut authority.key);
            resolve(&mut authority.cert);
        }
        for path in self.static_files.values_mut() {
            resolve(path);
        }
    }

    /// Configuration of the named authority.
    pub fn authority(&self, name: &str) -> Option<&AuthorityConfig> {
        self.authorities.iter().find(|a| a.name == name)
    }
}
