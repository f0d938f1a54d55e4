//! Error types for certificate authorities.

use std::time::Duration;

use thiserror::Error as ThisError;

use crate::Error;

/// Errors raised while loading an authority or signing and verifying with it.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum AuthorityError {
    /// A key or certificate file could not be read.
    #[error("Failed to read {path}")]
    Io {
        /// Path that failed to load
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The private key could not be parsed as an RSA key.
    #[error("Invalid private key for authority {name}: {reason}")]
    InvalidPrivateKey {
        /// Authority name
        name: String,
        /// Description of the parse failure
        reason: String,
    },

    /// The authority certificate or public key could not be parsed.
    #[error("Invalid certificate for authority {name}: {reason}")]
    InvalidCertificate {
        /// Authority name
        name: String,
        /// Description of the parse failure
        reason: String,
    },

    /// Private key and certificate describe different RSA keys.
    #[error("Private key does not match public key for authority {name}")]
    KeyMismatch {
        /// Authority name
        name: String,
    },

    /// Requested certificate lifespan is shorter than one second.
    #[error("Lifespan {lifespan:?} is too short to sign a certificate")]
    LifespanTooShort {
        /// The rejected lifespan
        lifespan: Duration,
    },

    /// Requested certificate lifespan reaches past what a certificate can
    /// encode.
    #[error("Lifespan {lifespan:?} is too long to sign a certificate")]
    LifespanTooLong {
        /// The rejected lifespan
        lifespan: Duration,
    },

    /// The certificate signing request failed to parse or its self-signature
    /// did not verify.
    #[error("Invalid certificate signing request: {reason}")]
    InvalidRequest {
        /// Description of the failure
        reason: String,
    },

    /// The SSH public key presented for signing failed to parse.
    #[error("Invalid SSH public key: {reason}")]
    InvalidPublicKey {
        /// Description of the failure
        reason: String,
    },

    /// A subject alternative name is not representable in a certificate.
    #[error("Invalid certificate name: {name}")]
    InvalidName {
        /// The rejected name
        name: String,
    },

    /// An SSH certificate was requested without any principals.
    #[error("SSH certificate requires at least one principal")]
    NoPrincipals,

    /// Building or signing the certificate failed.
    #[error("Signing failed: {reason}")]
    SigningFailed {
        /// Description of the failure
        reason: String,
    },

    /// The authority kind does not issue certificates.
    #[error("Authority {name} cannot sign")]
    CannotSign {
        /// Authority name
        name: String,
    },

    /// The authority kind cannot verify peer certificates.
    #[error("Authority {name} cannot verify certificates")]
    CannotVerify {
        /// Authority name
        name: String,
    },

    /// No peer certificate was presented.
    #[error("No peer certificate chain presented")]
    MissingChain,

    /// A peer certificate was rejected.
    #[error("Certificate verification failed: {reason}")]
    VerificationFailed {
        /// Description of the failure
        reason: String,
    },

    /// A verified certificate carries no subject common name.
    #[error("Certificate has no common name")]
    MissingCommonName,
}

impl AuthorityError {
    /// Check if this error arose while loading authority material.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            AuthorityError::Io { .. }
                | AuthorityError::InvalidPrivateKey { .. }
                | AuthorityError::InvalidCertificate { .. }
                | AuthorityError::KeyMismatch { .. }
        )
    }

    /// Check if this error is a cryptographic or parsing failure.
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            AuthorityError::InvalidPrivateKey { .. }
                | AuthorityError::InvalidCertificate { .. }
                | AuthorityError::KeyMismatch { .. }
                | AuthorityError::InvalidRequest { .. }
                | AuthorityError::InvalidPublicKey { .. }
                | AuthorityError::SigningFailed { .. }
        )
    }

    /// Check if this error rejects a presented peer certificate.
    pub fn is_verification_error(&self) -> bool {
        matches!(
            self,
            AuthorityError::MissingChain
                | AuthorityError::VerificationFailed { .. }
                | AuthorityError::MissingCommonName
        )
    }

    /// Check if the operation is unsupported by the authority kind.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            AuthorityError::CannotSign { .. } | AuthorityError::CannotVerify { .. }
        )
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, AuthorityError::Io { .. })
    }
}

impl From<AuthorityError> for Error {
    fn from(err: AuthorityError) -> Self {
        Error::Authority(err)
    }
}
