//! Cached server TLS certificate, renewed shortly before it expires.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::OsRng;
use rcgen::{CertificateParams, KeyPair};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use zeroize::Zeroizing;

use super::{Authority, AuthorityError};
use crate::Clock;
use crate::constants::SERVER_KEY_BITS;

/// A server key and the certificate chain issued for it.
#[derive(Clone)]
pub struct ServerCertificate {
    /// PKCS#8 PEM private key
    pub key_pem: Zeroizing<String>,
    /// Issued certificate followed by the authority certificate, PEM
    pub certificate_chain_pem: String,
    /// Expiry of the issued certificate, seconds since the Unix epoch
    pub not_after: i64,
}

impl std::fmt::Debug for ServerCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCertificate")
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Issues the server's own TLS certificate from a TLS authority and reuses it
/// until it is within `renew_margin` of expiring.
///
/// One mutex guards the cache, so at most one regeneration runs at a time and
/// concurrent callers wait for it.
pub struct ServerCertificateCache {
    authority: Arc<Authority>,
    principal: String,
    names: Vec<String>,
    lifespan: Duration,
    renew_margin: Duration,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<ServerCertificate>>,
}

impl std::fmt::Debug for ServerCertificateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ServerCertificateCache")
            .field("authority", &self.authority.name())
            .field("principal", &self.principal)
            .field("names", &self.names)
            .field("lifespan", &self.lifespan)
            .field("renew_margin", &self.renew_margin)
            .field("cached", &*cached)
            .finish()
    }
}

impl ServerCertificateCache {
    /// Create a cache over a TLS authority. Non-TLS authorities are rejected.
    pub fn new(
        authority: Arc<Authority>,
        principal: impl Into<String>,
        names: Vec<String>,
        lifespan: Duration,
        renew_margin: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthorityError> {
        if authority.as_tls().is_none() {
            return Err(AuthorityError::CannotSign {
                name: authority.name().to_string(),
            });
        }
        super::check_lifespan(lifespan)?;
        Ok(Self {
            authority,
            principal: principal.into(),
            names,
            lifespan,
            renew_margin,
            clock,
            cached: Mutex::new(None),
        })
    }

    /// Return the current server certificate, issuing a new one when none is
    /// cached or the cached one expires within the renewal margin.
    pub fn certificate(&self) -> Result<ServerCertificate, AuthorityError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        let now = self.clock.now_secs();
        let margin = i64::try_from(self.renew_margin.as_secs()).unwrap_or(i64::MAX);
        if let Some(current) = cached.as_ref()
            && now.saturating_add(margin) < current.not_after
        {
            return Ok(current.clone());
        }

        let fresh = self.issue()?;
        tracing::info!(
            principal = %self.principal,
            not_after = fresh.not_after,
            "renewed server certificate"
        );
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    fn issue(&self) -> Result<ServerCertificate, AuthorityError> {
        let failed = |reason: String| AuthorityError::SigningFailed { reason };

        let private = RsaPrivateKey::new(&mut OsRng, SERVER_KEY_BITS)
            .map_err(|e| failed(e.to_string()))?;
        let key_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| failed(e.to_string()))?;
        let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256)
            .map_err(|e| failed(e.to_string()))?;
        let request = CertificateParams::default()
            .serialize_request(&key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| failed(e.to_string()))?;

        let certificate =
            self.authority
                .sign(&request, true, self.lifespan, &self.principal, &self.names)?;
        let not_after = pem::parse(&certificate)
            .map_err(|e| failed(e.to_string()))
            .and_then(|parsed| {
                X509Certificate::from_der(parsed.contents())
                    .map(|(_, cert)| cert.validity().not_after.timestamp())
                    .map_err(|e| failed(e.to_string()))
            })?;
        let ca_pem = String::from_utf8_lossy(&self.authority.public_key()).into_owned();

        Ok(ServerCertificate {
            key_pem: Zeroizing::new(key_pem.to_string()),
            certificate_chain_pem: format!("{certificate}{ca_pem}"),
            not_after,
        })
    }
}
