//! OAuth token set and the credential store that holds it.
//!
//! The store is shared between the command path and the connection path, so
//! every accessor hands out a consistent clone taken under one lock.

use std::{
    sync::{PoisonError, RwLock},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampSeconds};
use veil::Redact;

/// Tokens issued by the identity provider.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Redact)]
pub struct TokenSet {
    #[redact]
    pub access_token: String,
    #[redact]
    pub refresh_token: String,
    #[redact]
    pub id_token: String,

    /// Absolute expiry, derived from `expires_in` when the set was issued.
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub expires_at: SystemTime,
}

impl TokenSet {
    /// Whether `now` falls within `margin` of the expiry.
    #[must_use]
    pub fn is_expiring_soon(&self, now: SystemTime, margin: Duration) -> bool {
        let threshold = self
            .expires_at
            .checked_sub(margin)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        now >= threshold
    }
}

#[derive(Clone, Debug, Default)]
struct Credentials {
    tokens: Option<TokenSet>,
    user_id: Option<String>,
}

/// Holds the latest [`TokenSet`] and the resolved user id.
#[derive(Debug, Default)]
pub struct CredentialStore {
    inner: RwLock<Credentials>,
}

impl CredentialStore {
    /// Refresh this long before the access token actually expires.
    pub const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from previously persisted credentials.
    #[must_use]
    pub fn with_tokens(tokens: TokenSet, user_id: Option<String>) -> Self {
        Self {
            inner: RwLock::new(Credentials {
                tokens: Some(tokens),
                user_id,
            }),
        }
    }

    #[must_use]
    pub fn tokens(&self) -> Option<TokenSet> {
        self.read().tokens
    }

    pub fn set_tokens(&self, tokens: TokenSet) {
        self.write(|credentials| credentials.tokens = Some(tokens));
    }

    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.read().user_id
    }

    pub fn set_user_id(&self, user_id: String) {
        self.write(|credentials| credentials.user_id = Some(user_id));
    }

    /// Whether the held token expires within `margin` of `now`.
    ///
    /// Without any tokens there is nothing valid to use, so this returns
    /// `true`.
    #[must_use]
    pub fn is_expiring_soon(&self, now: SystemTime, margin: Duration) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .as_ref()
            .map_or(true, |tokens| tokens.is_expiring_soon(now, margin))
    }

    fn read(&self) -> Credentials {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write<F>(&self, f: F)
    where
        F: FnOnce(&mut Credentials),
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}
