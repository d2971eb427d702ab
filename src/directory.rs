//! User and device lookups against the appliance API.
//!
//! Every call goes through [`AuthClient::ensure_valid`] first, so callers
//! never see an expired bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;
use veil::Redact;

use crate::{
    auth::AuthClient,
    error::{Error, Result},
    protocol::{
        self,
        api::{Device, SignatureResponse, UserIdRequest, UserIdResponse},
    },
};

/// The appliance a session is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceIdentity {
    pub user_id: String,
    pub thing_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

/// Everything needed to authenticate one broker connection.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct SessionCredentials {
    pub user_id: String,
    #[redact]
    pub access_token: String,
    #[redact]
    pub signature: String,
}

/// Supplies fresh credentials before each connection attempt.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn session_credentials(&self) -> Result<SessionCredentials>;
}

pub struct DeviceDirectory {
    auth: Arc<AuthClient>,
}

impl DeviceDirectory {
    const USER_ID_PATH: &'static str = "user/self/get-id";
    const DEVICES_PATH: &'static str = "user/self/device";
    const SIGNATURE_PATH: &'static str = "user/self/signature";

    #[must_use]
    pub fn new(auth: Arc<AuthClient>) -> Self {
        Self { auth }
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<AuthClient> {
        &self.auth
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.auth.config().api_base.join(path).map_err(Into::into)
    }

    /// Resolves the account id behind the current id token and caches it on
    /// the credential store.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if the API does not accept the id token.
    pub async fn resolve_user_id(&self) -> Result<String> {
        let tokens = self.auth.ensure_valid().await?;
        let http = self.auth.http();

        let body = serde_json::to_string(&UserIdRequest {
            id_token: &tokens.id_token,
        })?;
        let request = http.post_json(self.endpoint(Self::USER_ID_PATH)?, body);
        let response = http.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(Error::unauthenticated(format!(
                "user id lookup failed with {status}: {body}"
            )));
        }

        let UserIdResponse { user_id } = protocol::json(&body, Self::USER_ID_PATH)?;
        debug!("resolved user id {user_id}");
        self.auth.store().set_user_id(user_id.clone());

        Ok(user_id)
    }

    /// Lists the appliances registered to the account.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if the bearer token is rejected and
    /// `Unavailable` for other unsuccessful responses.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let body = self.get(Self::DEVICES_PATH).await?;
        protocol::json(&body, Self::DEVICES_PATH)
    }

    /// Resolves the user and picks the first listed appliance.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account has no appliances.
    pub async fn select_device(&self) -> Result<DeviceIdentity> {
        let user_id = match self.auth.store().user_id() {
            Some(user_id) => user_id,
            None => self.resolve_user_id().await?,
        };

        let devices = self.list_devices().await?;
        let count = devices.len();
        let device = devices
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("no appliances registered to this account"))?;

        if count > 1 {
            warn!(
                "{count} appliances registered; using {}",
                device.thing_name
            );
        }

        Ok(DeviceIdentity {
            user_id,
            thing_name: device.thing_name,
            friendly_name: device.friendly_name,
        })
    }

    /// Fetches a broker authorizer signature. Signatures are short-lived and
    /// should be used for exactly one connection attempt.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the API does not hand one out.
    pub async fn fetch_signature(&self) -> Result<String> {
        let body = self.get(Self::SIGNATURE_PATH).await.map_err(|e| {
            Error::permission_denied(format!("cannot obtain broker signature: {e}"))
        })?;

        let response: SignatureResponse = protocol::json(&body, Self::SIGNATURE_PATH)?;
        Ok(response.signature)
    }

    async fn get(&self, path: &str) -> Result<String> {
        let tokens = self.auth.ensure_valid().await?;
        let http = self.auth.http();

        let request = http.get_with_bearer(self.endpoint(path)?, &tokens.access_token)?;
        let response = http.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;
        match status {
            StatusCode::OK => Ok(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::unauthenticated(
                format!("{path} failed with {status}: {body}"),
            )),
            _ => Err(Error::unavailable(format!(
                "{path} failed with {status}: {body}"
            ))),
        }
    }
}

#[async_trait]
impl CredentialProvider for DeviceDirectory {
    async fn session_credentials(&self) -> Result<SessionCredentials> {
        let tokens = self.auth.ensure_valid().await?;
        let user_id = match self.auth.store().user_id() {
            Some(user_id) => user_id,
            None => self.resolve_user_id().await?,
        };
        let signature = self.fetch_signature().await?;

        Ok(SessionCredentials {
            user_id,
            access_token: tokens.access_token,
            signature,
        })
    }
}
