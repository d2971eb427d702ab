//! Endpoints, vendor registration constants and client credentials.
//!
//! The identity provider only accepts requests that look like they come
//! from the vendor's mobile app, so the redirect URI, scope and user agent
//! are fixed. The client id and secret are not embedded: they are supplied
//! by the host, from a secrets file or the environment.

use std::time::Duration;

use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

#[derive(Clone, Redact, PartialEq, Eq)]
pub struct Config {
    pub client_id: String,
    #[redact]
    pub client_secret: String,

    pub authorize_url: Url,
    pub token_url: Url,
    pub api_base: Url,
    pub broker_url: Url,

    pub redirect_uri: String,
    pub scope: String,
    pub user_agent: String,

    pub authorizer_name: String,
    pub tenant: String,

    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl Config {
    const AUTHORIZE_URL: &'static str =
        "https://cdc.accounts.home.id/oidc/op/v1.0/4_JGZWlP8eQHpEqkvQElolbA/authorize";
    const TOKEN_URL: &'static str =
        "https://cdc.accounts.home.id/oidc/op/v1.0/4_JGZWlP8eQHpEqkvQElolbA/oauth/token";

    // Trailing slash so that relative paths join below `/api/da`.
    const API_BASE: &'static str = "https://prod.eu-da.iot.versuni.com/api/da/";
    const BROKER_URL: &'static str = "wss://ats.prod.eu-da.iot.versuni.com:443/mqtt";

    const REDIRECT_URI: &'static str = "com.philips.air://loginredirect";
    const SCOPE: &'static str = "openid email profile address DI.Account.read \
        DI.AccountProfile.read DI.AccountProfile.write DI.AccountGeneralConsent.read \
        DI.AccountGeneralConsent.write DI.GeneralConsent.read subscriptions profile_extended \
        consents DI.AccountSubscription.read DI.AccountSubscription.write";
    const USER_AGENT: &'static str = "Air (com.philips.ph.homecare; build:3.16.1; \
        locale:en_US; Android:12 Sdk:2.2.0) okhttp/4.12.0";

    const AUTHORIZER_NAME: &'static str = "CustomAuthorizer";
    const TENANT: &'static str = "da";

    const KEEP_ALIVE: Duration = Duration::from_secs(30);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

    /// Creates a configuration for the production platform.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either credential is empty.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return Err(Error::invalid_argument(
                "client id and client secret must not be empty",
            ));
        }

        Ok(Self {
            client_id,
            client_secret,

            authorize_url: Url::parse(Self::AUTHORIZE_URL)?,
            token_url: Url::parse(Self::TOKEN_URL)?,
            api_base: Url::parse(Self::API_BASE)?,
            broker_url: Url::parse(Self::BROKER_URL)?,

            redirect_uri: Self::REDIRECT_URI.to_owned(),
            scope: Self::SCOPE.to_owned(),
            user_agent: Self::USER_AGENT.to_owned(),

            authorizer_name: Self::AUTHORIZER_NAME.to_owned(),
            tenant: Self::TENANT.to_owned(),

            keep_alive: Self::KEEP_ALIVE,
            connect_timeout: Self::CONNECT_TIMEOUT,
        })
    }

    /// Points all HTTP endpoints at another origin, keeping their paths.
    ///
    /// Used to run against a staging or stub server.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `origin` is not a base URL.
    pub fn with_http_origin(mut self, origin: &Url) -> Result<Self> {
        for url in [
            &mut self.authorize_url,
            &mut self.token_url,
            &mut self.api_base,
        ] {
            let rebased = origin.join(url.path())?;
            *url = rebased;
        }
        Ok(self)
    }

    /// Host name of the broker, as shown in logs.
    #[must_use]
    pub fn broker_host(&self) -> &str {
        self.broker_url.host_str().unwrap_or_default()
    }
}
