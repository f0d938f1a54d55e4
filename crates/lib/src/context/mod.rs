//! The compiled policy and the request entry points
//!
//! A [`Context`] is built once from a [`Config`] and is read-only afterwards,
//! apart from the token registry, the admission records and the server
//! certificate cache, each of which guards its own state. Callers share it by
//! reference (or through an `Arc` in the server).
//!
//! Handling a request is two steps: [`Context::authenticate`] turns the
//! presented [`Credentials`] into an account, and [`Context::dispatch`] runs a
//! batch of [`Request`]s against that account through an
//! [`OperationContext`].

mod errors;
mod operation;

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

pub use errors::ContextError;
pub use operation::{OperationContext, Request};

use crate::account::{Account, AccountError, Group, compile_accounts, compile_groups};
use crate::admit::AdmitChecker;
use crate::authority::{
    Authority, AuthorityKind, ServerCertificate, ServerCertificateCache, load_authority,
};
use crate::config::{Config, ConfigError, ServerTlsConfig};
use crate::constants::IP_METADATA_KEY;
use crate::grant::{CompileEnv, compile_privileges, parse_duration, validate_grants};
use crate::token::TokenRegistry;
use crate::{Clock, Result, SystemClock};

/// What a caller presented to authenticate.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// DER certificates, leaf first.
    pub certificate_chain: Vec<Vec<u8>>,
    /// A bootstrap token.
    pub token: Option<String>,
    /// Address the request came from.
    pub source_ip: Option<IpAddr>,
}

impl Credentials {
    /// Credentials from a PEM certificate chain, leaf first.
    pub fn from_pem_chain(chain_pem: &str) -> std::result::Result<Self, ContextError> {
        let blocks = pem::parse_many(chain_pem).map_err(|e| ContextError::InvalidCertificate {
            reason: e.to_string(),
        })?;
        let certificate_chain: Vec<Vec<u8>> = blocks
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(pem::Pem::into_contents)
            .collect();
        if certificate_chain.is_empty() {
            return Err(ContextError::InvalidCertificate {
                reason: "no CERTIFICATE block".to_string(),
            });
        }
        Ok(Self {
            certificate_chain,
            ..Default::default()
        })
    }

    /// Credentials carrying only a bootstrap token.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Record the source address of the request.
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }
}

/// The compiled policy.
pub struct Context {
    authorities: HashMap<String, Arc<Authority>>,
    authentication_authority: Arc<Authority>,
    groups: HashMap<String, Arc<Group>>,
    accounts: HashMap<String, Arc<Account>>,
    static_files: BTreeMap<String, Vec<u8>>,
    tokens: TokenRegistry,
    admission: Option<AdmitChecker>,
    server_tls: Option<ServerCertificateCache>,
}

impl Context {
    /// Compile a policy document, loading every authority and static file it
    /// references.
    pub fn compile(config: &Config) -> Result<Self> {
        Self::compile_impl(config, Arc::new(SystemClock))
    }

    /// Like [`Context::compile`] with an injected clock.
    ///
    /// Only available with the `testing` feature or in test builds.
    #[cfg(any(test, feature = "testing"))]
    pub fn compile_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::compile_impl(config, clock)
    }

    fn compile_impl(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut authorities = HashMap::new();
        for entry in &config.authorities {
            if authorities.contains_key(&entry.name) {
                return Err(ConfigError::DuplicateAuthority {
                    name: entry.name.clone(),
                }
                .into());
            }
            let authority = load_authority(
                &entry.name,
                entry.kind,
                &entry.key,
                &entry.cert,
                Arc::clone(&clock),
            )?;
            authorities.insert(entry.name.clone(), Arc::new(authority));
        }

        let authentication_authority =
            tls_authority(&authorities, &config.authentication_authority)?;

        let mut group_set = compile_groups(&config.groups)?;
        let mut accounts = compile_accounts(&config.accounts, &mut group_set)?;
        let groups: HashMap<String, Arc<Group>> = group_set
            .into_groups()
            .map(|group| (group.name().to_string(), Arc::new(group)))
            .collect();

        let env = CompileEnv {
            authorities: &authorities,
            groups: &groups,
            admission_enabled: config.admission_authority.is_some(),
        };
        validate_grants(&config.grants, &env)?;
        for account in &mut accounts {
            let privileges = compile_privileges(account, &config.grants, &env)?;
            account.set_privileges(privileges);
        }

        let admission = match &config.admission_authority {
            Some(name) => Some(AdmitChecker::new(
                tls_authority(&authorities, name)?,
                admission_allow_list(&accounts)?,
                Arc::clone(&clock),
            )?),
            None => None,
        };

        let server_tls = config
            .server_tls
            .as_ref()
            .map(|server| server_certificate_cache(&authorities, server, Arc::clone(&clock)))
            .transpose()?;

        let mut static_files = BTreeMap::new();
        for (name, path) in &config.static_files {
            let contents = std::fs::read(path).map_err(|source| ConfigError::StaticFile {
                name: name.clone(),
                path: path.display().to_string(),
                source,
            })?;
            static_files.insert(name.clone(), contents);
        }

        let accounts: HashMap<String, Arc<Account>> = accounts
            .into_iter()
            .map(|account| (account.principal().to_string(), Arc::new(account)))
            .collect();

        tracing::info!(
            authorities = authorities.len(),
            groups = groups.len(),
            accounts = accounts.len(),
            grants = config.grants.len(),
            admission = admission.is_some(),
            "compiled policy"
        );

        Ok(Self {
            authorities,
            authentication_authority,
            groups,
            accounts,
            static_files,
            tokens: TokenRegistry::new(clock),
            admission,
            server_tls,
        })
    }

    /// Look up an account by principal.
    pub fn account(&self, principal: &str) -> Result<Arc<Account>> {
        self.accounts
            .get(principal)
            .cloned()
            .ok_or_else(|| {
                ContextError::UnknownAccount {
                    principal: principal.to_string(),
                }
                .into()
            })
    }

    pub fn authority(&self, name: &str) -> Result<&Arc<Authority>> {
        self.authorities.get(name).ok_or_else(|| {
            ContextError::UnknownAuthority {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn group(&self, name: &str) -> Option<&Arc<Group>> {
        self.groups.get(name)
    }

    /// The public encoding of the named authority. Servable without
    /// authentication.
    pub fn public_key(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.authority(name)?.public_key())
    }

    pub fn static_file(&self, name: &str) -> Result<&[u8]> {
        self.static_files
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                ContextError::UnknownStaticFile {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// The admission checker, if an admission authority is configured.
    pub fn admission(&self) -> Result<&AdmitChecker> {
        self.admission
            .as_ref()
            .ok_or_else(|| ContextError::AdmissionDisabled.into())
    }

    /// Handle an admission request from `source`.
    pub fn admit(&self, csr_pem: &str, source: IpAddr) -> Result<String> {
        Ok(self.admission()?.admit(csr_pem, source)?)
    }

    /// The server's current TLS key and certificate chain.
    pub fn server_certificate(&self) -> Result<ServerCertificate> {
        let cache = self
            .server_tls
            .as_ref()
            .ok_or(ContextError::ServerTlsDisabled)?;
        Ok(cache.certificate()?)
    }

    /// Resolve the account behind a set of credentials.
    ///
    /// A certificate chain takes precedence over a token. The account must
    /// allow direct authentication, and an account bound to an address must
    /// come from that address.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<Arc<Account>> {
        let (principal, method) = if !credentials.certificate_chain.is_empty() {
            let principal = self
                .authentication_authority
                .verify(&credentials.certificate_chain)?;
            (principal, "certificate")
        } else if let Some(token) = &credentials.token {
            (self.tokens.verify(token)?, "token")
        } else {
            return Err(ContextError::NoCredentials.into());
        };

        let account = self.account(&principal)?;
        if account.disable_direct_auth() {
            return Err(ContextError::DirectAuthDisabled { principal }.into());
        }
        if let Some(bound) = account.limit_ip()
            && credentials.source_ip != Some(bound)
        {
            return Err(ContextError::IpMismatch {
                principal,
                source_ip: credentials.source_ip,
            }
            .into());
        }

        tracing::debug!(principal = %principal, method, "authenticated");
        Ok(account)
    }

    /// Run a batch of requests as `account`. The result is aligned with the
    /// requests; the first failure aborts the batch.
    pub fn dispatch(&self, account: Arc<Account>, requests: &[Request]) -> Result<Vec<String>> {
        let mut operation = OperationContext::new(self, account);
        requests
            .iter()
            .map(|request| operation.invoke(request))
            .collect()
    }

    /// Authenticate and then dispatch a batch.
    pub fn handle_request(
        &self,
        credentials: &Credentials,
        requests: &[Request],
    ) -> Result<Vec<String>> {
        let account = self.authenticate(credentials)?;
        self.dispatch(account, requests)
    }

    /// Authorities, sorted by name.
    pub fn authorities(&self) -> Vec<&Arc<Authority>> {
        let mut authorities: Vec<_> = self.authorities.values().collect();
        authorities.sort_by(|a, b| a.name().cmp(b.name()));
        authorities
    }

    /// Accounts, sorted by principal.
    pub fn accounts(&self) -> Vec<&Arc<Account>> {
        let mut accounts: Vec<_> = self.accounts.values().collect();
        accounts.sort_by(|a, b| a.principal().cmp(b.principal()));
        accounts
    }

    pub fn static_file_names(&self) -> impl Iterator<Item = &str> {
        self.static_files.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("authorities", &self.authorities.keys().collect::<Vec<_>>())
            .field(
                "authentication_authority",
                &self.authentication_authority.name(),
            )
            .field("groups", &self.groups.len())
            .field("accounts", &self.accounts.len())
            .field("static_files", &self.static_files.keys().collect::<Vec<_>>())
            .field("tokens", &self.tokens)
            .field("admission", &self.admission)
            .field("server_tls", &self.server_tls.is_some())
            .finish()
    }
}

fn tls_authority(
    authorities: &HashMap<String, Arc<Authority>>,
    name: &str,
) -> std::result::Result<Arc<Authority>, ConfigError> {
    let authority = authorities
        .get(name)
        .ok_or_else(|| ConfigError::UnknownAuthority {
            name: name.to_string(),
        })?;
    if authority.kind() != AuthorityKind::Tls {
        return Err(ConfigError::WrongAuthorityKind {
            name: name.to_string(),
            expected: AuthorityKind::Tls,
        });
    }
    Ok(Arc::clone(authority))
}

/// Map each account's `ip` metadata to its principal.
fn admission_allow_list(accounts: &[Account]) -> Result<HashMap<IpAddr, String>> {
    let mut allow_list = HashMap::new();
    for account in accounts {
        let Some(value) = account.metadata().get(IP_METADATA_KEY) else {
            continue;
        };
        let ip = IpAddr::from_str(value).map_err(|_| AccountError::InvalidIp {
            principal: account.principal().to_string(),
            value: value.clone(),
        })?;
        if let Some(other) = allow_list.insert(ip, account.principal().to_string()) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.metadata.ip", account.principal()),
                reason: format!("{ip} is already bound to {other}"),
            }
            .into());
        }
    }
    Ok(allow_list)
}

fn server_certificate_cache(
    authorities: &HashMap<String, Arc<Authority>>,
    server: &ServerTlsConfig,
    clock: Arc<dyn Clock>,
) -> Result<ServerCertificateCache> {
    let invalid = |field: &str, reason: String| ConfigError::InvalidValue {
        field: format!("server-tls.{field}"),
        reason,
    };
    let lifespan =
        parse_duration(&server.lifespan).map_err(|e| invalid("lifespan", e.to_string()))?;
    let renew_margin = parse_duration(&server.renew_margin)
        .map_err(|e| invalid("renew-margin", e.to_string()))?;
    if renew_margin >= lifespan {
        return Err(invalid(
            "renew-margin",
            "must be shorter than the lifespan".to_string(),
        )
        .into());
    }

    Ok(ServerCertificateCache::new(
        tls_authority(authorities, &server.authority)?,
        server.principal.clone(),
        server.names.clone(),
        lifespan,
        renew_margin,
        clock,
    )?)
}
