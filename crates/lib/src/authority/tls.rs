//! X.509 certificate authority.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{
    Certificate, CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, Ia5String, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;

use super::{AuthorityError, check_lifespan, parse_rsa_private_key};
use crate::Clock;
use crate::constants::SERIAL_NUMBER_BYTES;

/// A TLS certificate authority: an RSA key and the CA certificate describing it.
///
/// Two TLS authorities are equal when their certificates are byte-identical.
pub struct TlsAuthority {
    name: String,
    key: KeyPair,
    issuer: Certificate,
    certificate_der: Vec<u8>,
    certificate_pem: String,
    clock: Arc<dyn Clock>,
}

impl TlsAuthority {
    /// Build an authority from a PEM private key (PKCS#8 or PKCS#1) and a PEM
    /// certificate. Fails when the two describe different RSA keys.
    pub fn from_pem(
        name: &str,
        key_pem: &str,
        certificate_pem: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthorityError> {
        let invalid_cert = |reason: String| AuthorityError::InvalidCertificate {
            name: name.to_string(),
            reason,
        };

        let private = parse_rsa_private_key(name, key_pem)?;
        let parsed_pem = pem::parse(certificate_pem).map_err(|e| invalid_cert(e.to_string()))?;
        if parsed_pem.tag() != "CERTIFICATE" {
            return Err(invalid_cert(format!(
                "expected CERTIFICATE, found {}",
                parsed_pem.tag()
            )));
        }
        let certificate_der = parsed_pem.contents().to_vec();

        let (_, parsed) = X509Certificate::from_der(&certificate_der)
            .map_err(|e| invalid_cert(e.to_string()))?;
        let modulus = match parsed.public_key().parsed() {
            Ok(PublicKey::RSA(rsa_key)) => strip_leading_zeros(rsa_key.modulus).to_vec(),
            Ok(_) => return Err(invalid_cert("certificate key is not RSA".to_string())),
            Err(e) => return Err(invalid_cert(e.to_string())),
        };
        if modulus != private.n().to_bytes_be() {
            return Err(AuthorityError::KeyMismatch {
                name: name.to_string(),
            });
        }

        let pkcs8 = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthorityError::InvalidPrivateKey {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let key = KeyPair::from_pem_and_sign_algo(&pkcs8, &rcgen::PKCS_RSA_SHA256).map_err(|e| {
            AuthorityError::InvalidPrivateKey {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        let issuer = CertificateParams::from_ca_cert_pem(certificate_pem)
            .and_then(|params| params.self_signed(&key))
            .map_err(|e| invalid_cert(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            key,
            issuer,
            certificate_der,
            certificate_pem: certificate_pem.to_string(),
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The CA certificate as loaded, in PEM form.
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// The CA certificate in DER form.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Sign a PEM certificate signing request.
    ///
    /// The issued certificate is valid from now for exactly `lifespan` (whole
    /// seconds), carries digital-signature key usage and client-auth extended
    /// key usage (plus server-auth when `is_host`), and lists `names` as DNS
    /// or IP subject alternative names.
    pub fn sign(
        &self,
        request: &str,
        is_host: bool,
        lifespan: Duration,
        common_name: &str,
        names: &[String],
    ) -> Result<String, AuthorityError> {
        check_lifespan(lifespan)?;

        let csr = CertificateSigningRequestParams::from_pem(request).map_err(|e| {
            AuthorityError::InvalidRequest {
                reason: e.to_string(),
            }
        })?;

        let not_before = OffsetDateTime::from_unix_timestamp(self.clock.now_secs()).map_err(|e| {
            AuthorityError::SigningFailed {
                reason: e.to_string(),
            }
        })?;
        let not_after = i64::try_from(lifespan.as_secs())
            .ok()
            .and_then(|secs| not_before.checked_add(time::Duration::seconds(secs)))
            .ok_or(AuthorityError::LifespanTooLong { lifespan })?;

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name);

        let mut extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        if is_host {
            extended_key_usages.push(ExtendedKeyUsagePurpose::ServerAuth);
        }

        let mut params = CertificateParams::default();
        params.not_before = not_before;
        params.not_after = not_after;
        params.serial_number = Some(random_serial());
        params.distinguished_name = distinguished_name;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = extended_key_usages;
        params.subject_alt_names = subject_alt_names(names)?;
        params.use_authority_key_identifier_extension = true;

        let certificate = params
            .signed_by(&csr.public_key, &self.issuer, &self.key)
            .map_err(|e| AuthorityError::SigningFailed {
                reason: e.to_string(),
            })?;

        tracing::info!(
            authority = %self.name,
            common_name = %common_name,
            names = ?names,
            is_host,
            lifespan_secs = lifespan.as_secs(),
            "issued TLS certificate"
        );
        Ok(certificate.pem())
    }

    /// Verify a DER certificate chain presented by a peer and return the
    /// leaf's common name.
    ///
    /// The leaf must be issued by this authority, carry a valid signature
    /// from its key, be within its validity window and permit client
    /// authentication.
    pub fn verify(&self, chain: &[Vec<u8>]) -> Result<String, AuthorityError> {
        let failed = |reason: String| AuthorityError::VerificationFailed { reason };

        let leaf_der = chain.first().ok_or(AuthorityError::MissingChain)?;
        let (_, leaf) = X509Certificate::from_der(leaf_der).map_err(|e| failed(e.to_string()))?;
        let (_, ca) = X509Certificate::from_der(&self.certificate_der)
            .map_err(|e| failed(e.to_string()))?;

        if leaf.issuer().as_raw() != ca.subject().as_raw() {
            return Err(failed(format!(
                "issuer {} is not authority {}",
                leaf.issuer(),
                self.name
            )));
        }
        leaf.verify_signature(Some(ca.public_key()))
            .map_err(|e| failed(format!("bad signature: {e}")))?;

        let now = self.clock.now_secs();
        let validity = leaf.validity();
        if now < validity.not_before.timestamp() || now > validity.not_after.timestamp() {
            return Err(failed("certificate is outside its validity window".to_string()));
        }

        // Absent extended key usage permits any usage.
        if let Some(eku) = leaf
            .extended_key_usage()
            .map_err(|e| failed(e.to_string()))?
        {
            if !eku.value.client_auth && !eku.value.any {
                return Err(failed("certificate does not permit client authentication".to_string()));
            }
        }

        let common_name = leaf
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .ok_or(AuthorityError::MissingCommonName)?;
        Ok(common_name.to_string())
    }
}

impl PartialEq for TlsAuthority {
    fn eq(&self, other: &Self) -> bool {
        self.certificate_der == other.certificate_der
    }
}

impl Eq for TlsAuthority {}

impl fmt::Debug for TlsAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsAuthority")
            .field("name", &self.name)
            .field("certificate_len", &self.certificate_der.len())
            .finish_non_exhaustive()
    }
}

/// A random positive serial of 159 bits.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_NUMBER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn subject_alt_names(names: &[String]) -> Result<Vec<SanType>, AuthorityError> {
    names
        .iter()
        .map(|name| match name.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => Ia5String::try_from(name.as_str())
                .map(SanType::DnsName)
                .map_err(|_| AuthorityError::InvalidName { name: name.clone() }),
        })
        .collect()
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
