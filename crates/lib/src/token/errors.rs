//! Error types for bootstrap tokens.

use thiserror::Error as ThisError;

use crate::Error;

/// Errors that can occur while looking up or redeeming a bootstrap token.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum TokenError {
    /// The token was never granted, or it has already been swept or redeemed.
    #[error("Unrecognized token")]
    Unrecognized,

    /// The token was claimed before.
    #[error("Token already claimed")]
    AlreadyClaimed,

    /// The token's lifespan has passed.
    #[error("Token has expired")]
    Expired,
}

impl TokenError {
    /// Check if this error indicates the token is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TokenError::Unrecognized)
    }

    /// Check if this error indicates the token was already used.
    pub fn is_already_claimed(&self) -> bool {
        matches!(self, TokenError::AlreadyClaimed)
    }

    /// Check if this error indicates the token has expired.
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::Expired)
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        Error::Token(err)
    }
}
