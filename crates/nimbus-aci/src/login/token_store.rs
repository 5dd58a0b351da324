//! Persisted Azure token store backed by a JSON file.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use nimbus_common::error::{NimbusError, Result};

/// Refresh tokens slightly before the reported expiry to absorb clock skew.
const EXPIRY_MARGIN_SECONDS: i64 = 10;

/// An OAuth2 token pair with its expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token; empty for service principal logins.
    #[serde(default)]
    pub refresh_token: String,
    /// Token type, always `Bearer` in practice.
    #[serde(default)]
    pub token_type: String,
    /// Expiry instant.
    pub expiry: DateTime<Utc>,
}

impl OAuthToken {
    /// Whether the token exists and has not expired.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && self.expiry - Duration::seconds(EXPIRY_MARGIN_SECONDS) > Utc::now()
    }
}

/// Persisted login state: the token plus the tenant and cloud it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Azure AD tenant the token was issued for.
    pub tenant_id: String,
    /// The token pair.
    pub token: OAuthToken,
    /// Cloud environment name the token belongs to.
    pub cloud_environment: String,
}

/// JSON-file-backed token store.
#[derive(Debug)]
pub struct TokenStore {
    store_path: PathBuf,
}

impl TokenStore {
    /// Opens a token store at the given path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn open(store_path: impl Into<PathBuf>) -> Result<Self> {
        let store_path = store_path.into();
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NimbusError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Ok(Self { store_path })
    }

    /// Reads the persisted login state.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` when no login is stored and a
    /// parsing error when the file is corrupt.
    pub fn read(&self) -> Result<TokenInfo> {
        if !self.store_path.exists() {
            return Err(NimbusError::NotFound {
                kind: "azure login data",
                id: self.store_path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(&self.store_path).map_err(|e| NimbusError::Io {
            path: self.store_path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persists the login state, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, info: &TokenInfo) -> Result<()> {
        let json = serde_json::to_string_pretty(info)?;
        std::fs::write(&self.store_path, json).map_err(|e| NimbusError::Io {
            path: self.store_path.clone(),
            source: e,
        })
    }

    /// Removes the persisted login state.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` when there is nothing to remove.
    pub fn remove(&self) -> Result<()> {
        if !self.store_path.exists() {
            return Err(NimbusError::NotFound {
                kind: "azure login data",
                id: self.store_path.display().to_string(),
            });
        }
        std::fs::remove_file(&self.store_path).map_err(|e| NimbusError::Io {
            path: self.store_path.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info(expiry: DateTime<Utc>) -> TokenInfo {
        TokenInfo {
            tenant_id: "tenant1".to_owned(),
            token: OAuthToken {
                access_token: "access".to_owned(),
                refresh_token: "refresh".to_owned(),
                token_type: "Bearer".to_owned(),
                expiry,
            },
            cloud_environment: "AzureCloud".to_owned(),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::open(dir.path().join("token.json")).expect("open");
        let info = sample_info(Utc::now() + Duration::hours(1));
        store.write(&info).expect("write");
        assert_eq!(store.read().expect("read"), info);
    }

    #[test]
    fn read_without_login_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::open(dir.path().join("token.json")).expect("open");
        assert!(matches!(
            store.read().expect_err("missing"),
            NimbusError::NotFound { .. }
        ));
    }

    #[test]
    fn remove_without_login_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::open(dir.path().join("token.json")).expect("open");
        assert!(store.remove().is_err());
    }

    #[test]
    fn expired_tokens_are_invalid() {
        let expired = sample_info(Utc::now() - Duration::minutes(1));
        assert!(!expired.token.is_valid());
        let fresh = sample_info(Utc::now() + Duration::hours(1));
        assert!(fresh.token.is_valid());
    }

    #[test]
    fn empty_access_token_is_invalid() {
        let mut info = sample_info(Utc::now() + Duration::hours(1));
        info.token.access_token.clear();
        assert!(!info.token.is_valid());
    }
}
