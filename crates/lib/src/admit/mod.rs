//! First-contact node admission
//!
//! A node that holds no credentials yet submits a certificate signing request
//! from its own address. The request's key fingerprint must have been
//! approved by an operator for the principal that address belongs to, within
//! the last five minutes. Only then does the admission authority issue a
//! long-lived client certificate.
//!
//! Per fingerprint the state moves `unseen -> seen -> seen + approved`, and an
//! approval expires on its own. Records are created lazily and never removed.

mod errors;
pub mod fingerprint;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use errors::AdmitError;
pub use fingerprint::{fingerprint_request, normalize_fingerprint};

use crate::Clock;
use crate::clock::format_millis_rfc3339;
use crate::authority::{Authority, AuthorityError};
use crate::constants::{ADMIT_APPROVAL_WINDOW, ADMIT_CERTIFICATE_LIFESPAN};

/// What is known about one fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmitState {
    pub seen: bool,
    /// Principal of the address that last presented the fingerprint.
    pub seen_principal: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub seen_at: Option<u64>,
    pub approved: bool,
    pub approved_principal: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub approval_expires_at: Option<u64>,
}

/// Tracks fingerprints and issues certificates for approved ones.
pub struct AdmitChecker {
    authority: Arc<Authority>,
    allow_list: HashMap<IpAddr, String>,
    states: Mutex<HashMap<String, AdmitState>>,
    clock: Arc<dyn Clock>,
}

impl AdmitChecker {
    /// Create a checker issuing from a TLS `authority` for the addresses in
    /// `allow_list`.
    pub fn new(
        authority: Arc<Authority>,
        allow_list: HashMap<IpAddr, String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AdmitError> {
        if authority.as_tls().is_none() {
            return Err(AuthorityError::CannotSign {
                name: authority.name().to_string(),
            }
            .into());
        }
        Ok(Self {
            authority,
            allow_list,
            states: Mutex::new(HashMap::new()),
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AdmitState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The principal bound to a source address.
    pub fn principal_for(&self, ip: IpAddr) -> Result<&str, AdmitError> {
        self.allow_list
            .get(&ip)
            .map(String::as_str)
            .ok_or(AdmitError::UnknownSource { ip })
    }

    /// Record that `principal` presented `fingerprint` and check that it has
    /// a live approval for that principal.
    pub fn check_approved(&self, fingerprint: &str, principal: &str) -> Result<(), AdmitError> {
        let now = self.clock.now_millis();
        let mut states = self.lock();
        let state = states.entry(fingerprint.to_string()).or_default();

        state.seen = true;
        state.seen_principal = Some(principal.to_string());
        state.seen_at = Some(now);

        if !state.approved {
            return Err(AdmitError::NotApproved {
                fingerprint: fingerprint.to_string(),
            });
        }
        if state.approval_expires_at.is_none_or(|expires| now > expires) {
            return Err(AdmitError::ApprovalExpired {
                fingerprint: fingerprint.to_string(),
            });
        }
        match state.approved_principal.as_deref() {
            Some(approved) if approved == principal => Ok(()),
            approved => Err(AdmitError::PrincipalMismatch {
                seen: principal.to_string(),
                approved: approved.unwrap_or_default().to_string(),
            }),
        }
    }

    /// Approve `fingerprint` for `principal` for the next five minutes.
    /// Approving again simply restarts the window. Returns the normalized
    /// fingerprint.
    pub fn approve(&self, fingerprint: &str, principal: &str) -> Result<String, AdmitError> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        let expires = self.clock.deadline(ADMIT_APPROVAL_WINDOW);

        let mut states = self.lock();
        let state = states.entry(fingerprint.clone()).or_default();
        state.approved = true;
        state.approved_principal = Some(principal.to_string());
        state.approval_expires_at = Some(expires);
        tracing::debug!(
            fingerprint = %fingerprint,
            expires = %format_millis_rfc3339(expires),
            "approval window opened"
        );
        Ok(fingerprint)
    }

    /// Handle an admission request: sign `csr_pem` if its fingerprint is
    /// approved for the principal owning `source`.
    pub fn admit(&self, csr_pem: &str, source: IpAddr) -> Result<String, AdmitError> {
        let principal = self.principal_for(source)?;
        let fingerprint = fingerprint_request(csr_pem)?;

        if let Err(err) = self.check_approved(&fingerprint, principal) {
            tracing::warn!(
                principal = %principal,
                source = %source,
                fingerprint = %fingerprint,
                error = %err,
                "admission refused"
            );
            return Err(err);
        }

        let certificate =
            self.authority
                .sign(csr_pem, false, ADMIT_CERTIFICATE_LIFESPAN, principal, &[])?;
        tracing::info!(
            principal = %principal,
            source = %source,
            fingerprint = %fingerprint,
            "admitted node"
        );
        Ok(certificate)
    }

    /// Snapshot of a fingerprint's record.
    pub fn state(&self, fingerprint: &str) -> Option<AdmitState> {
        let fingerprint = normalize_fingerprint(fingerprint).ok()?;
        self.lock().get(&fingerprint).cloned()
    }

    /// Number of fingerprints with a record.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AdmitChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmitChecker")
            .field("authority", &self.authority.name())
            .field("allow_list", &self.allow_list)
            .field("records", &self.len())
            .finish_non_exhaustive()
    }
}
