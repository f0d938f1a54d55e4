//! Pronounceable key fingerprints
//!
//! A fingerprint is the SHA-256 OpenSSH fingerprint of an RSA public key,
//! written as proquints: each 16-bit word becomes five letters alternating
//! consonant and vowel, and words are joined with `-`. Operators read these
//! aloud to confirm a node's key out of band.

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use ssh_key::HashAlg;
use ssh_key::public::KeyData;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;

use super::AdmitError;
use crate::constants::MIN_RSA_KEY_BITS;

const CONSONANTS: &[u8; 16] = b"bdfghjklmnprstvz";
const VOWELS: &[u8; 4] = b"aiou";

/// Number of bytes in a SHA-256 fingerprint.
pub const FINGERPRINT_BYTES: usize = 32;

/// Encode bytes as proquints. An odd trailing byte is padded with zero.
pub fn encode_proquints(bytes: &[u8]) -> String {
    bytes
        .chunks(2)
        .map(|chunk| {
            let word = u16::from_be_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)]);
            let letters = [
                CONSONANTS[usize::from(word >> 12)],
                VOWELS[usize::from((word >> 10) & 0x3)],
                CONSONANTS[usize::from((word >> 6) & 0xf)],
                VOWELS[usize::from((word >> 4) & 0x3)],
                CONSONANTS[usize::from(word & 0xf)],
            ];
            letters.iter().map(|&b| char::from(b)).collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Decode a `-`-separated proquint sequence. Case is ignored.
pub fn decode_proquints(text: &str) -> Result<Vec<u8>, AdmitError> {
    let invalid = |reason: String| AdmitError::InvalidFingerprint {
        fingerprint: text.to_string(),
        reason,
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty fingerprint".to_string()));
    }

    let mut bytes = Vec::new();
    for word in trimmed.split('-') {
        let letters = word.to_ascii_lowercase().into_bytes();
        if letters.len() != 5 {
            return Err(invalid(format!("word {word:?} is not five letters")));
        }

        let consonant = |b: u8| {
            CONSONANTS
                .iter()
                .position(|&c| c == b)
                .map(|i| i as u16)
                .ok_or_else(|| invalid(format!("{:?} is not a proquint consonant", char::from(b))))
        };
        let vowel = |b: u8| {
            VOWELS
                .iter()
                .position(|&v| v == b)
                .map(|i| i as u16)
                .ok_or_else(|| invalid(format!("{:?} is not a proquint vowel", char::from(b))))
        };

        let word = (consonant(letters[0])? << 12)
            | (vowel(letters[1])? << 10)
            | (consonant(letters[2])? << 6)
            | (vowel(letters[3])? << 4)
            | consonant(letters[4])?;
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    Ok(bytes)
}

/// Canonicalize an operator-supplied fingerprint by decoding and re-encoding
/// it. Fails unless it decodes to exactly one SHA-256 digest.
pub fn normalize_fingerprint(text: &str) -> Result<String, AdmitError> {
    let bytes = decode_proquints(text)?;
    if bytes.len() != FINGERPRINT_BYTES {
        return Err(AdmitError::InvalidFingerprint {
            fingerprint: text.to_string(),
            reason: format!("decodes to {} bytes, expected {FINGERPRINT_BYTES}", bytes.len()),
        });
    }
    Ok(encode_proquints(&bytes))
}

/// Fingerprint an RSA public key. Keys under 2048 bits are rejected.
pub fn fingerprint_public_key(key: &RsaPublicKey) -> Result<String, AdmitError> {
    let bits = key.n().bits();
    if bits < MIN_RSA_KEY_BITS {
        return Err(AdmitError::WeakKey {
            bits,
            minimum: MIN_RSA_KEY_BITS,
        });
    }

    let ssh_public =
        ssh_key::public::RsaPublicKey::try_from(key).map_err(|e| AdmitError::InvalidRequest {
            reason: e.to_string(),
        })?;
    let fingerprint = KeyData::from(ssh_public).fingerprint(HashAlg::Sha256);
    Ok(encode_proquints(fingerprint.as_bytes()))
}

/// Fingerprint the key in a PEM certificate signing request, checking its
/// size and the request's self-signature.
pub fn fingerprint_request(csr_pem: &str) -> Result<String, AdmitError> {
    let invalid = |reason: String| AdmitError::InvalidRequest { reason };

    let parsed = pem::parse(csr_pem).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.tag(), "CERTIFICATE REQUEST" | "NEW CERTIFICATE REQUEST") {
        return Err(invalid(format!("unexpected PEM block {}", parsed.tag())));
    }
    let (_, csr) = X509CertificationRequest::from_der(parsed.contents())
        .map_err(|e| invalid(e.to_string()))?;

    let key = match csr.certification_request_info.subject_pki.parsed() {
        Ok(PublicKey::RSA(rsa_key)) => RsaPublicKey::new(
            BigUint::from_bytes_be(rsa_key.modulus),
            BigUint::from_bytes_be(rsa_key.exponent),
        )
        .map_err(|e| invalid(e.to_string()))?,
        Ok(_) => return Err(AdmitError::NotRsa),
        Err(e) => return Err(invalid(e.to_string())),
    };
    // Size first: signature checks only accept keys of at least 2048 bits.
    let fingerprint = fingerprint_public_key(&key)?;
    csr.verify_signature()
        .map_err(|e| invalid(format!("bad signature: {e}")))?;
    Ok(fingerprint)
}
