//! OpenSSH certificate authority.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha512;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::public::{KeyData, RsaPublicKey};
use ssh_key::{Algorithm, HashAlg, PublicKey};

use super::{AuthorityError, check_lifespan, parse_rsa_private_key};
use crate::Clock;

/// Extensions granted to every user certificate, matching `ssh-keygen`'s
/// defaults.
const USER_EXTENSIONS: [&str; 5] = [
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-pty",
    "permit-user-rc",
];

/// Signs certificates with `rsa-sha2-512`.
struct CaSigner {
    key: pkcs1v15::SigningKey<Sha512>,
    public: KeyData,
}

impl Signer<ssh_key::Signature> for CaSigner {
    fn try_sign(&self, msg: &[u8]) -> Result<ssh_key::Signature, rsa::signature::Error> {
        let signature = self.key.try_sign(msg)?;
        ssh_key::Signature::new(
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
            signature.to_vec(),
        )
        .map_err(|_| rsa::signature::Error::new())
    }
}

impl From<&CaSigner> for KeyData {
    fn from(signer: &CaSigner) -> KeyData {
        signer.public.clone()
    }
}

/// An SSH certificate authority: an RSA key and its authorized-key line.
pub struct SshAuthority {
    name: String,
    signer: CaSigner,
    public_key_line: String,
    clock: Arc<dyn Clock>,
}

impl SshAuthority {
    /// Build an authority from a PEM RSA private key (PKCS#8 or PKCS#1) and an
    /// authorized-key line. Fails when the two describe different keys.
    pub fn from_pem(
        name: &str,
        key_pem: &str,
        public_key_line: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthorityError> {
        let private = parse_rsa_private_key(name, key_pem)?;
        let derived = rsa_key_data(&private).map_err(|e| AuthorityError::InvalidPrivateKey {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let public_key_line = public_key_line.trim();
        let configured = PublicKey::from_openssh(public_key_line).map_err(|e| {
            AuthorityError::InvalidCertificate {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        if configured.key_data() != &derived {
            return Err(AuthorityError::KeyMismatch {
                name: name.to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            signer: CaSigner {
                key: pkcs1v15::SigningKey::<Sha512>::new(private),
                public: derived,
            },
            public_key_line: public_key_line.to_string(),
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The authority's public key as an authorized-key line.
    pub fn public_key_line(&self) -> &str {
        &self.public_key_line
    }

    /// Sign an authorized-key line into an OpenSSH certificate line.
    ///
    /// `common_name` becomes the key id and `names` the valid principals; at
    /// least one principal is required.
    pub fn sign(
        &self,
        request: &str,
        is_host: bool,
        lifespan: Duration,
        common_name: &str,
        names: &[String],
    ) -> Result<String, AuthorityError> {
        check_lifespan(lifespan)?;
        if names.is_empty() {
            return Err(AuthorityError::NoPrincipals);
        }

        let subject = PublicKey::from_openssh(request.trim()).map_err(|e| {
            AuthorityError::InvalidPublicKey {
                reason: e.to_string(),
            }
        })?;

        let signing_failed = |e: ssh_key::Error| AuthorityError::SigningFailed {
            reason: e.to_string(),
        };

        let valid_after = self.clock.now_secs().max(0) as u64;
        let valid_before = valid_after
            .checked_add(lifespan.as_secs())
            .ok_or(AuthorityError::LifespanTooLong { lifespan })?;
        let mut builder = Builder::new_with_random_nonce(
            &mut OsRng,
            subject.key_data().clone(),
            valid_after,
            valid_before,
        )
        .map_err(signing_failed)?;

        let cert_type = if is_host {
            CertType::Host
        } else {
            CertType::User
        };
        builder
            .serial(OsRng.next_u64())
            .and_then(|b| b.cert_type(cert_type))
            .and_then(|b| b.key_id(common_name))
            .map_err(signing_failed)?;
        for name in names {
            builder.valid_principal(name.as_str()).map_err(signing_failed)?;
        }
        if !is_host {
            for extension in USER_EXTENSIONS {
                builder.extension(extension, "").map_err(signing_failed)?;
            }
        }

        let certificate = builder.sign(&self.signer).map_err(signing_failed)?;
        let line = certificate.to_openssh().map_err(signing_failed)?;

        tracing::info!(
            authority = %self.name,
            key_id = %common_name,
            principals = ?names,
            is_host,
            lifespan_secs = lifespan.as_secs(),
            "issued SSH certificate"
        );
        Ok(line)
    }
}

impl fmt::Debug for SshAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshAuthority")
            .field("name", &self.name)
            .field("public_key", &self.public_key_line)
            .finish_non_exhaustive()
    }
}

fn rsa_key_data(private: &RsaPrivateKey) -> Result<KeyData, ssh_key::Error> {
    let public = RsaPublicKey::try_from(private.to_public_key())?;
    Ok(KeyData::from(public))
}
