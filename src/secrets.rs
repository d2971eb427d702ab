//! TOML file with client credentials and the persisted login.
//!
//! ```toml
//! client_id = "..."
//! client_secret = "..."
//!
//! [device]
//! user_id = "..."
//! thing_name = "da-0123"
//! friendly_name = "Bedroom"
//!
//! [tokens]
//! access_token = "..."
//! refresh_token = "..."
//! id_token = "..."
//! expires_at = 1700000000
//! ```
//!
//! The file grants access to the account, so keep it private.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::{
    config::Config,
    directory::DeviceIdentity,
    error::{Error, ErrorKind, Result},
    tokens::{CredentialStore, TokenSet},
};

#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize, Redact)]
pub struct Secrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[redact]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceIdentity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,
}

impl Secrets {
    /// Prevent out-of-memory conditions: the file should be small.
    const MAX_FILE_SIZE: u64 = 16 * 1024;

    /// Reads and parses the secrets file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, `InvalidArgument` if it
    /// is oversized or not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            Error::invalid_argument(format!("{} format is invalid: {e}", path.display()))
        })
    }

    /// Like [`Secrets::load`], but a missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns any error other than a missing file.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(e) if e.kind == ErrorKind::NotFound => Ok(Self::default()),
            result => result,
        }
    }

    /// Writes the file, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string(self)?;

        let staging = path.with_extension("toml.tmp");
        fs::write(&staging, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&staging, path)?;

        Ok(())
    }

    /// Loads the file, applies `f` and saves it again.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or written.
    pub fn update<F>(path: &Path, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self),
    {
        let mut secrets = Self::load_or_default(path)?;
        f(&mut secrets);
        secrets.save(path)
    }

    /// Builds the platform configuration, preferring explicitly passed
    /// credentials over the ones in the file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either credential is missing everywhere.
    pub fn config(
        &self,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<Config> {
        let client_id = client_id
            .or_else(|| self.client_id.clone())
            .ok_or_else(|| Error::not_found("no client id configured"))?;
        let client_secret = client_secret
            .or_else(|| self.client_secret.clone())
            .ok_or_else(|| Error::not_found("no client secret configured"))?;

        Config::new(client_id, client_secret)
    }

    /// A credential store seeded with the persisted login.
    #[must_use]
    pub fn credential_store(&self) -> CredentialStore {
        let user_id = self.device.as_ref().map(|device| device.user_id.clone());
        match &self.tokens {
            Some(tokens) => CredentialStore::with_tokens(tokens.clone(), user_id),
            None => {
                let store = CredentialStore::new();
                if let Some(user_id) = user_id {
                    store.set_user_id(user_id);
                }
                store
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use tempfile::tempdir;

    use super::*;

    fn tokens() -> TokenSet {
        TokenSet {
            access_token: "access".to_owned(),
            refresh_token: "refresh".to_owned(),
            id_token: "id".to_owned(),
            expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn saves_and_loads_session() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        let secrets = Secrets {
            client_id: Some("id".to_owned()),
            client_secret: Some("secret".to_owned()),
            device: Some(DeviceIdentity {
                user_id: "user-1".to_owned(),
                thing_name: "da-0123".to_owned(),
                friendly_name: None,
            }),
            tokens: Some(tokens()),
        };

        secrets.save(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("expires_at = 1700000000"));
        assert!(contents.contains("[device]"));

        assert_eq!(Secrets::load(&path).unwrap(), secrets);
        assert!(!dir.path().join("secrets.toml.tmp").exists());
    }

    #[test]
    fn update_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        assert_eq!(Secrets::load_or_default(&path).unwrap(), Secrets::default());

        Secrets::update(&path, |secrets| secrets.tokens = Some(tokens())).unwrap();
        Secrets::update(&path, |secrets| secrets.client_id = Some("id".to_owned())).unwrap();

        let loaded = Secrets::load(&path).unwrap();
        assert_eq!(loaded.tokens, Some(tokens()));
        assert_eq!(loaded.client_id.as_deref(), Some("id"));
    }

    #[test]
    fn rejects_oversized_and_invalid_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.toml");

        fs::write(&path, "x".repeat(20_000)).unwrap();
        assert_eq!(Secrets::load(&path).unwrap_err().kind, ErrorKind::InvalidArgument);

        fs::write(&path, "client_id = ").unwrap();
        assert_eq!(Secrets::load(&path).unwrap_err().kind, ErrorKind::InvalidArgument);

        fs::remove_file(&path).unwrap();
        assert_eq!(Secrets::load(&path).unwrap_err().kind, ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        Secrets::default().save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn explicit_credentials_win() {
        let secrets = Secrets {
            client_id: Some("file-id".to_owned()),
            client_secret: Some("file-secret".to_owned()),
            ..Default::default()
        };

        let config = secrets.config(Some("cli-id".to_owned()), None).unwrap();
        assert_eq!(config.client_id, "cli-id");
        assert_eq!(config.client_secret, "file-secret");

        let err = Secrets::default().config(None, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn seeds_credential_store() {
        let secrets = Secrets {
            device: Some(DeviceIdentity {
                user_id: "user-1".to_owned(),
                thing_name: "da-0123".to_owned(),
                friendly_name: None,
            }),
            tokens: Some(tokens()),
            ..Default::default()
        };

        let store = secrets.credential_store();
        assert_eq!(store.tokens(), Some(tokens()));
        assert_eq!(store.user_id().as_deref(), Some("user-1"));
    }

    #[test]
    fn debug_redacts_secret() {
        let secrets = Secrets {
            client_secret: Some("hunter2".to_owned()),
            ..Default::default()
        };
        assert!(!format!("{secrets:?}").contains("hunter2"));
    }
}
