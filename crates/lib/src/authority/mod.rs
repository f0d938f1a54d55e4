//! Certificate authorities
//!
//! An [`Authority`] is one of a closed set of signers:
//!
//! * [`TlsAuthority`]: RSA key plus X.509 CA certificate; signs CSRs into
//!   client (and optionally server) certificates and verifies client chains.
//! * [`SshAuthority`]: RSA key plus OpenSSH public key; signs user and host
//!   certificates.
//! * [`StaticAuthority`]: raw key material with a raw public part. It never
//!   signs; it exists so grants can distribute service-account keys.
//!
//! Authorities are loaded once at startup and never change afterwards.

mod errors;
pub mod server;
pub mod ssh;
pub mod tls;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub use errors::AuthorityError;
pub use server::{ServerCertificate, ServerCertificateCache};
pub use ssh::SshAuthority;
pub use tls::TlsAuthority;

use crate::Clock;
use crate::constants::MIN_CERTIFICATE_LIFESPAN;

/// The kind of an authority as named in the policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorityKind {
    #[serde(rename = "TLS", alias = "tls")]
    Tls,
    #[serde(rename = "SSH", alias = "ssh")]
    Ssh,
    #[serde(rename = "static")]
    Static,
}

impl fmt::Display for AuthorityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityKind::Tls => write!(f, "TLS"),
            AuthorityKind::Ssh => write!(f, "SSH"),
            AuthorityKind::Static => write!(f, "static"),
        }
    }
}

/// Pass-through key material that can be published and fetched but never signs.
pub struct StaticAuthority {
    name: String,
    key: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl StaticAuthority {
    pub fn new(name: impl Into<String>, key: Vec<u8>, public: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            key: Zeroizing::new(key),
            public,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The secret key material, as loaded.
    pub fn key_material(&self) -> &[u8] {
        &self.key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public
    }
}

impl fmt::Debug for StaticAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAuthority")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .field("public_len", &self.public.len())
            .finish()
    }
}

/// A loaded certificate authority.
#[derive(Debug)]
pub enum Authority {
    Tls(TlsAuthority),
    Ssh(SshAuthority),
    Static(StaticAuthority),
}

impl Authority {
    /// Name of the authority as configured.
    pub fn name(&self) -> &str {
        match self {
            Authority::Tls(tls) => tls.name(),
            Authority::Ssh(ssh) => ssh.name(),
            Authority::Static(stat) => stat.name(),
        }
    }

    pub fn kind(&self) -> AuthorityKind {
        match self {
            Authority::Tls(_) => AuthorityKind::Tls,
            Authority::Ssh(_) => AuthorityKind::Ssh,
            Authority::Static(_) => AuthorityKind::Static,
        }
    }

    /// Sign a request into a certificate.
    ///
    /// For TLS the request is a PEM certificate signing request and the result
    /// is a PEM certificate. For SSH the request is an authorized-key line and
    /// the result is an OpenSSH certificate line. `names` become subject
    /// alternative names (TLS) or valid principals (SSH).
    pub fn sign(
        &self,
        request: &str,
        is_host: bool,
        lifespan: Duration,
        common_name: &str,
        names: &[String],
    ) -> Result<String, AuthorityError> {
        match self {
            Authority::Tls(tls) => tls.sign(request, is_host, lifespan, common_name, names),
            Authority::Ssh(ssh) => ssh.sign(request, is_host, lifespan, common_name, names),
            Authority::Static(stat) => Err(AuthorityError::CannotSign {
                name: stat.name().to_string(),
            }),
        }
    }

    /// The public encoding of this authority: certificate PEM for TLS, the
    /// authorized-key line for SSH and the raw public part for static keys.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            Authority::Tls(tls) => tls.certificate_pem().as_bytes().to_vec(),
            Authority::Ssh(ssh) => ssh.public_key_line().as_bytes().to_vec(),
            Authority::Static(stat) => stat.public_key().to_vec(),
        }
    }

    /// Verify a DER peer certificate chain and return the leaf's common name.
    pub fn verify(&self, chain: &[Vec<u8>]) -> Result<String, AuthorityError> {
        match self {
            Authority::Tls(tls) => tls.verify(chain),
            Authority::Ssh(_) | Authority::Static(_) => Err(AuthorityError::CannotVerify {
                name: self.name().to_string(),
            }),
        }
    }

    /// Secret key material for static authorities; `None` for signers.
    pub fn key_material(&self) -> Option<&[u8]> {
        match self {
            Authority::Static(stat) => Some(stat.key_material()),
            Authority::Tls(_) | Authority::Ssh(_) => None,
        }
    }

    pub fn as_tls(&self) -> Option<&TlsAuthority> {
        match self {
            Authority::Tls(tls) => Some(tls),
            _ => None,
        }
    }
}

/// Load an authority of the given kind from a key file and a certificate (or
/// public key) file.
pub fn load_authority(
    name: &str,
    kind: AuthorityKind,
    key_path: &Path,
    cert_path: &Path,
    clock: Arc<dyn Clock>,
) -> Result<Authority, AuthorityError> {
    let key = Zeroizing::new(read_file(key_path)?);
    let cert = read_file(cert_path)?;

    let authority = match kind {
        AuthorityKind::Tls => {
            let (key, cert) = (text(name, &key)?, text(name, &cert)?);
            Authority::Tls(TlsAuthority::from_pem(name, key, cert, clock)?)
        }
        AuthorityKind::Ssh => {
            let (key, cert) = (text(name, &key)?, text(name, &cert)?);
            Authority::Ssh(SshAuthority::from_pem(name, key, cert, clock)?)
        }
        AuthorityKind::Static => Authority::Static(StaticAuthority::new(name, key.to_vec(), cert)),
    };

    tracing::info!(
        authority = %name,
        kind = %kind,
        key = %key_path.display(),
        "loaded authority"
    );
    Ok(authority)
}

fn read_file(path: &Path) -> Result<Vec<u8>, AuthorityError> {
    std::fs::read(path).map_err(|source| AuthorityError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn text<'a>(name: &str, bytes: &'a [u8]) -> Result<&'a str, AuthorityError> {
    std::str::from_utf8(bytes).map_err(|_| AuthorityError::InvalidCertificate {
        name: name.to_string(),
        reason: "file is not PEM text".to_string(),
    })
}

/// Parse an RSA private key in PKCS#8 or PKCS#1 PEM form.
pub(crate) fn parse_rsa_private_key(
    name: &str,
    pem_text: &str,
) -> Result<RsaPrivateKey, AuthorityError> {
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePrivateKey;

    match RsaPrivateKey::from_pkcs8_pem(pem_text) {
        Ok(key) => Ok(key),
        Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(pem_text).map_err(|pkcs1_err| {
            AuthorityError::InvalidPrivateKey {
                name: name.to_string(),
                reason: format!("not PKCS#8 ({pkcs8_err}) or PKCS#1 ({pkcs1_err})"),
            }
        }),
    }
}

pub(crate) fn check_lifespan(lifespan: Duration) -> Result<(), AuthorityError> {
    if lifespan < MIN_CERTIFICATE_LIFESPAN {
        return Err(AuthorityError::LifespanTooShort { lifespan });
    }
    Ok(())
}
