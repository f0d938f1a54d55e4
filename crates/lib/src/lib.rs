//!
//! Keyserver: the trust kernel of a cluster-internal certificate authority.
//!
//! A policy document is compiled once at startup into a [`Context`]. The
//! context then answers authenticated batches of API calls, issues short-lived
//! TLS and SSH credentials, and enrolls new nodes through a fingerprint
//! challenge.
//!
//! ## Core Concepts
//!
//! * **Authorities (`authority::Authority`)**: RSA-backed signers for TLS
//!   client/server certificates and OpenSSH certificates, plus static
//!   pass-through key material that can be distributed but never signs.
//! * **Accounts and groups (`account`)**: principals arranged in a tree of
//!   groups; a member of a group is a member of every ancestor.
//! * **Grants and privileges (`grant`)**: declarative grants compiled per
//!   account into executable privileges bound to authorities, groups and the
//!   token registry.
//! * **Tokens (`token::TokenRegistry`)**: single-use, expiring bootstrap
//!   credentials.
//! * **Admission (`admit::AdmitChecker`)**: first-contact enrollment gated on an
//!   operator approving a pronounceable key fingerprint.

pub mod account;
pub mod admit;
pub mod authority;
pub mod clock;
pub mod config;
pub mod constants;
pub mod context;
pub mod grant;
pub mod token;

pub use clock::{Clock, SystemClock};
pub use context::{Context, Credentials, OperationContext, Request};

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;

/// Result type used throughout the keyserver library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the keyserver library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structured errors from the authority module
    #[error(transparent)]
    Authority(authority::AuthorityError),

    /// Structured errors from the token module
    #[error(transparent)]
    Token(token::TokenError),

    /// Structured errors from the account module
    #[error(transparent)]
    Account(account::AccountError),

    /// Structured errors from the grant module
    #[error(transparent)]
    Grant(grant::GrantError),

    /// Structured errors from the admit module
    #[error(transparent)]
    Admit(admit::AdmitError),

    /// Structured errors from the config module
    #[error(transparent)]
    Config(config::ConfigError),

    /// Structured errors from the context module
    #[error(transparent)]
    Context(context::ContextError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Authority(_) => "authority",
            Error::Token(_) => "token",
            Error::Account(_) => "account",
            Error::Grant(_) => "grant",
            Error::Admit(_) => "admit",
            Error::Config(_) => "config",
            Error::Context(_) => "context",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// Check if this error is an explicit authorization refusal.
    ///
    /// Forbidden errors cover unknown APIs for the calling account, scope
    /// violations during impersonation or bootstrap, IP mismatches and
    /// accounts that may not authenticate directly.
    pub fn is_forbidden(&self) -> bool {
        match self {
            Error::Context(err) => err.is_forbidden(),
            Error::Grant(err) => err.is_forbidden(),
            _ => false,
        }
    }

    /// Check if this error was raised while compiling the policy.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Error::Config(_) | Error::Account(_) => true,
            Error::Grant(err) => err.is_configuration_error(),
            Error::Authority(err) => err.is_load_error(),
            _ => false,
        }
    }

    /// Check if this error is a cryptographic or parsing failure.
    pub fn is_crypto_error(&self) -> bool {
        match self {
            Error::Authority(err) => err.is_crypto_error(),
            Error::Admit(err) => err.is_crypto_error(),
            _ => false,
        }
    }

    /// Check if this error reports an expired credential or approval.
    pub fn is_expired(&self) -> bool {
        match self {
            Error::Token(err) => err.is_expired(),
            Error::Admit(err) => err.is_expired(),
            _ => false,
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Token(err) => err.is_not_found(),
            Error::Account(err) => err.is_not_found(),
            Error::Context(err) => err.is_not_found(),
            Error::Grant(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is authentication-related.
    pub fn is_authentication_error(&self) -> bool {
        match self {
            Error::Context(err) => err.is_authentication_error(),
            Error::Token(_) => true,
            Error::Authority(err) => err.is_verification_error(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Authority(err) => err.is_io_error(),
            Error::Config(err) => err.is_io_error(),
            _ => false,
        }
    }
}
