//! Single-use bootstrap tokens
//!
//! A [`TokenRegistry`] hands out opaque random tokens bound to a principal and
//! an absolute expiry. Each token can be claimed exactly once. Expired tokens
//! are swept lazily whenever a new token is granted.

mod errors;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;

pub use errors::TokenError;

use crate::Clock;
use crate::clock::format_millis_rfc3339;
use crate::constants::TOKEN_BYTES;

/// A granted bootstrap token.
pub struct ScopedToken {
    token: String,
    subject: String,
    expires_at: u64,
    claimed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl ScopedToken {
    /// The opaque token string.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The principal this token authenticates as.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Absolute expiry, milliseconds since the Unix epoch.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Mark the token as used. Succeeds for exactly one caller.
    pub fn claim(&self) -> Result<(), TokenError> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| TokenError::AlreadyClaimed)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    pub fn has_expired(&self) -> bool {
        self.clock.now_millis() > self.expires_at
    }
}

impl fmt::Debug for ScopedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedToken")
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .field("claimed", &self.is_claimed())
            .finish_non_exhaustive()
    }
}

/// In-memory store of outstanding bootstrap tokens.
pub struct TokenRegistry {
    tokens: Mutex<HashMap<String, Arc<ScopedToken>>>,
    clock: Arc<dyn Clock>,
}

impl TokenRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ScopedToken>>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grant a new token for `subject`, valid for `lifespan` from now.
    ///
    /// Expired tokens are swept first.
    ///
    /// # Panics
    ///
    /// Panics if the freshly generated token collides with an outstanding one.
    pub fn grant_token(&self, subject: &str, lifespan: Duration) -> String {
        let mut tokens = self.lock();

        let before = tokens.len();
        tokens.retain(|_, token| !token.has_expired());
        let swept = before - tokens.len();
        if swept > 0 {
            tracing::debug!(swept, "swept expired tokens");
        }

        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let expires_at = self.clock.deadline(lifespan);
        let scoped = Arc::new(ScopedToken {
            token: token.clone(),
            subject: subject.to_string(),
            expires_at,
            claimed: AtomicBool::new(false),
            clock: Arc::clone(&self.clock),
        });
        if tokens.insert(token.clone(), scoped).is_some() {
            panic!("bootstrap token collision");
        }

        tracing::info!(
            subject = %subject,
            expires = %format_millis_rfc3339(expires_at),
            "granted bootstrap token"
        );
        token
    }

    /// Look up an outstanding token.
    pub fn lookup_token(&self, token: &str) -> Result<Arc<ScopedToken>, TokenError> {
        self.lock()
            .get(token)
            .cloned()
            .ok_or(TokenError::Unrecognized)
    }

    /// Redeem a token: it must exist, be unexpired and unclaimed. Returns the
    /// principal it was granted for and forgets the token.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        let scoped = self.lookup_token(token)?;
        if scoped.has_expired() {
            return Err(TokenError::Expired);
        }
        scoped.claim()?;
        self.lock().remove(token);

        tracing::info!(subject = %scoped.subject(), "claimed bootstrap token");
        Ok(scoped.subject().to_string())
    }

    /// Number of outstanding (possibly expired but unswept) tokens.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("outstanding", &self.len())
            .finish_non_exhaustive()
    }
}
