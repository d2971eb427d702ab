//! OAuth2 login and token lifecycle.
//!
//! Login is an authorization code grant with PKCE. The user opens the URL
//! from [`AuthClient::authorization_url`], signs in, and pastes the redirect
//! back; [`AuthClient::exchange_code`] turns the code into a [`TokenSet`].
//! From then on [`AuthClient::ensure_valid`] is the only way to obtain a
//! bearer token: it refreshes when the access token is within
//! [`CredentialStore::EXPIRY_MARGIN`] of expiring.
//!
//! Every successful exchange or refresh is written through to the
//! [`CredentialStore`] and reported once to the token update callback, so
//! the host can persist it.

use std::{sync::Arc, time::SystemTime};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use url::Url;
use veil::Redact;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::auth::TokenResponse,
    tokens::{CredentialStore, TokenSet},
};

/// Called with the new token set after every exchange and refresh.
///
/// Runs on the async runtime while other callers of
/// [`AuthClient::ensure_valid`] wait for the refresh to finish, so it must
/// return quickly. A small local file write is fine; anything slower belongs
/// on a blocking task.
pub type TokenCallback = Arc<dyn Fn(&TokenSet) + Send + Sync>;

/// Verifier and challenge for one authorization attempt.
///
/// Consumed by [`AuthClient::exchange_code`], so a verifier is never sent
/// twice.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct Pkce {
    #[redact]
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// Number of random bytes behind the verifier.
    const VERIFIER_BYTES: usize = 32;

    /// Generates a fresh verifier from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0; Self::VERIFIER_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);

        Self {
            challenge: Self::challenge_for(&verifier),
            verifier,
        }
    }

    /// The S256 challenge for `verifier`.
    #[must_use]
    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

pub struct AuthClient {
    config: Arc<Config>,
    http: Arc<HttpClient>,
    store: Arc<CredentialStore>,

    /// Serializes refreshes so that concurrent callers share one request.
    refresh_lock: Mutex<()>,

    on_token_update: Option<TokenCallback>,
}

impl AuthClient {
    const GRANT_AUTHORIZATION_CODE: &'static str = "authorization_code";
    const GRANT_REFRESH_TOKEN: &'static str = "refresh_token";

    #[must_use]
    pub fn new(config: Arc<Config>, http: Arc<HttpClient>, store: Arc<CredentialStore>) -> Self {
        Self {
            config,
            http,
            store,
            refresh_lock: Mutex::new(()),
            on_token_update: None,
        }
    }

    /// Registers the callback invoked after every token update.
    #[must_use]
    pub fn with_token_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TokenSet) + Send + Sync + 'static,
    {
        self.on_token_update = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[must_use]
    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    #[must_use]
    pub fn generate_pkce() -> Pkce {
        Pkce::generate()
    }

    /// The identity provider page to sign in on.
    #[must_use]
    pub fn authorization_url(&self, pkce: &Pkce) -> Url {
        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("ui_locales", "en-US")
            .append_pair("scope", &self.config.scope);
        url
    }

    /// Extracts the authorization code from a pasted redirect URL.
    ///
    /// Accepts the full custom-scheme redirect as well as fragments of it,
    /// as long as a `code=` parameter is present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if no code can be found.
    pub fn code_from_redirect(redirect: &str) -> Result<String> {
        let redirect = redirect.trim();

        let code = Url::parse(redirect)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "code")
                    .map(|(_, code)| code.into_owned())
            })
            .or_else(|| {
                redirect
                    .split_once("code=")
                    .and_then(|(_, rest)| rest.split('&').next())
                    .map(ToOwned::to_owned)
            });

        code.filter(|code| !code.is_empty()).ok_or_else(|| {
            Error::invalid_argument("redirect URL does not contain an authorization code")
        })
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if the token endpoint rejects the code, or
    /// the underlying error if the request fails.
    pub async fn exchange_code(&self, code: &str, pkce: Pkce) -> Result<TokenSet> {
        let pairs = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", Self::GRANT_AUTHORIZATION_CODE),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        self.request_tokens(Self::GRANT_AUTHORIZATION_CODE, pairs)
            .await
    }

    /// Refreshes the tokens, whether or not they are about to expire.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if there is no refresh token or the token
    /// endpoint rejects it.
    pub async fn refresh(&self) -> Result<TokenSet> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Returns tokens that are good for at least the expiry margin,
    /// refreshing first if needed.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if no tokens are held or the refresh is
    /// rejected.
    pub async fn ensure_valid(&self) -> Result<TokenSet> {
        if let Some(tokens) = self.fresh_tokens() {
            return Ok(tokens);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while this one waited.
        if let Some(tokens) = self.fresh_tokens() {
            return Ok(tokens);
        }

        debug!("access token is expiring; refreshing");
        self.refresh_locked().await
    }

    fn fresh_tokens(&self) -> Option<TokenSet> {
        let tokens = self.store.tokens()?;
        if tokens.is_expiring_soon(SystemTime::now(), CredentialStore::EXPIRY_MARGIN) {
            None
        } else {
            Some(tokens)
        }
    }

    async fn refresh_locked(&self) -> Result<TokenSet> {
        let refresh_token = self
            .store
            .tokens()
            .map(|tokens| tokens.refresh_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::unauthenticated("no refresh token; log in first"))?;

        let pairs = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", Self::GRANT_REFRESH_TOKEN),
            ("refresh_token", refresh_token.as_str()),
        ];
        self.request_tokens(Self::GRANT_REFRESH_TOKEN, pairs).await
    }

    async fn request_tokens<'a, I>(&self, grant: &str, pairs: I) -> Result<TokenSet>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let request = self.http.post_form(self.config.token_url.clone(), pairs);
        let response = self.http.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(Error::unauthenticated(format!(
                "{grant} grant failed with {status}: {body}"
            )));
        }

        // Parsed without the logging helper: the body is all secrets.
        let response: TokenResponse = serde_json::from_str(&body)?;
        let lifetime = response.expires_in();
        let expires_at = SystemTime::now().checked_add(lifetime).ok_or_else(|| {
            Error::invalid_argument(format!(
                "{grant} grant returned an unusable lifetime of {}s",
                lifetime.as_secs()
            ))
        })?;

        // Refresh responses may leave out tokens that did not change.
        let previous = self.store.tokens();
        let refresh_token = response
            .refresh_token
            .or_else(|| previous.as_ref().map(|tokens| tokens.refresh_token.clone()))
            .unwrap_or_default();
        let id_token = response
            .id_token
            .or_else(|| previous.map(|tokens| tokens.id_token))
            .unwrap_or_default();

        let tokens = TokenSet {
            access_token: response.access_token,
            refresh_token,
            id_token,
            expires_at,
        };

        self.store.set_tokens(tokens.clone());
        info!(
            "{grant} grant succeeded; access token valid for {}s",
            lifetime.as_secs()
        );

        if let Some(callback) = &self.on_token_update {
            callback(&tokens);
        }

        Ok(tokens)
    }
}
