//! OAuth token endpoint response types.
//!
//! The identity provider answers both the authorization code grant and the
//! refresh token grant with the same shape:
//!
//! ```json
//! {
//!     "access_token": "secret_token",
//!     "refresh_token": "secret_refresh",
//!     "id_token": "jwt",
//!     "token_type": "Bearer",
//!     "expires_in": 3600
//! }
//! ```
//!
//! Refresh responses may omit `refresh_token` and `id_token`, and some
//! deployments omit `expires_in`; callers fill in the gaps.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

/// Token grant response from the identity provider.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
pub struct TokenResponse {
    #[redact]
    pub access_token: String,

    #[redact]
    pub refresh_token: Option<String>,

    #[redact]
    pub id_token: Option<String>,

    /// Lifetime of the access token, counted from the moment of issue.
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    pub expires_in: Option<Duration>,
}

impl TokenResponse {
    /// Lifetime assumed when the provider does not state one.
    pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_in.unwrap_or(Self::DEFAULT_EXPIRES_IN)
    }
}
