//! Azure AD HTTP plumbing behind the [`ApiHelper`] abstraction.
//!
//! The trait exists so the login state machine can be tested with a mock;
//! [`AzureApiClient`] is the live implementation.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use nimbus_common::error::{NimbusError, Result};

use crate::login::cloud_environment::CloudEnvironment;
use crate::login::token_store::OAuthToken;
use crate::login::CLIENT_ID;

/// Wire shape of an Azure AD token response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AzureToken {
    /// Token type, `Bearer`.
    #[serde(default)]
    pub token_type: String,
    /// Granted scopes.
    #[serde(default)]
    pub scope: String,
    /// Seconds until expiry.
    #[serde(default)]
    pub expires_in: i64,
    /// Access token.
    #[serde(default)]
    pub access_token: String,
    /// Refresh token, absent for client credential grants.
    #[serde(default)]
    pub refresh_token: String,
}

impl AzureToken {
    /// Converts the wire token into the persisted representation.
    #[must_use]
    pub fn into_oauth_token(self) -> OAuthToken {
        OAuthToken {
            expiry: Utc::now() + Duration::seconds(self.expires_in),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    message: String,
    #[serde(default = "default_poll_interval")]
    interval: u64,
    #[serde(default)]
    expires_in: u64,
}

const fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
}

/// HTTP operations the login state machine depends on.
#[async_trait]
pub trait ApiHelper: Send + Sync {
    /// Posts a form to the cloud's token endpoint for the given tenant.
    async fn query_token(
        &self,
        ce: &CloudEnvironment,
        data: &[(String, String)],
        tenant_id: &str,
    ) -> Result<AzureToken>;

    /// Opens the interactive authorization page in the user's browser.
    fn open_login_page(&self, redirect_url: &str, ce: &CloudEnvironment) -> Result<()>;

    /// Performs a GET with an authorization header, returning body and status.
    async fn query_api_with_header(
        &self,
        authorization_url: &str,
        authorization_header: &str,
    ) -> Result<(Vec<u8>, u16)>;

    /// Runs the device code flow to completion.
    async fn device_code_token(&self, ce: &CloudEnvironment) -> Result<AzureToken>;
}

/// Live Azure AD client.
#[derive(Debug, Default)]
pub struct AzureApiClient {
    http: reqwest::Client,
}

impl AzureApiClient {
    /// Creates the client with a fresh connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiHelper for AzureApiClient {
    async fn query_token(
        &self,
        ce: &CloudEnvironment,
        data: &[(String, String)],
        tenant_id: &str,
    ) -> Result<AzureToken> {
        let response = self
            .http
            .post(ce.token_url(tenant_id))
            .form(data)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NimbusError::LoginFailed {
                message: format!(
                    "error while renewing access token, status: {}",
                    response.status()
                ),
            });
        }
        Ok(response.json().await?)
    }

    fn open_login_page(&self, redirect_url: &str, ce: &CloudEnvironment) -> Result<()> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let auth_url = ce.authorize_url(CLIENT_ID, redirect_url, &state);
        open_browser(&auth_url)
    }

    async fn query_api_with_header(
        &self,
        authorization_url: &str,
        authorization_header: &str,
    ) -> Result<(Vec<u8>, u16)> {
        let response = self
            .http
            .get(authorization_url)
            .header(reqwest::header::AUTHORIZATION, authorization_header)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok((body, status))
    }

    async fn device_code_token(&self, ce: &CloudEnvironment) -> Result<AzureToken> {
        let response = self
            .http
            .post(ce.device_code_url())
            .form(&[
                ("client_id", CLIENT_ID),
                ("scope", &ce.token_scope()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NimbusError::LoginFailed {
                message: format!("device code request failed, status: {}", response.status()),
            });
        }
        let device: DeviceCodeResponse = response.json().await?;
        tracing::info!("{}", device.message);

        let deadline = std::time::Instant::now()
            + std::time::Duration::from_secs(device.expires_in.max(60));
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(device.interval)).await;
            if std::time::Instant::now() > deadline {
                return Err(NimbusError::LoginFailed {
                    message: "device code expired before the login was completed".to_owned(),
                });
            }

            let poll = self
                .http
                .post(ce.token_url("organizations"))
                .form(&[
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ("client_id", CLIENT_ID),
                    ("device_code", &device.device_code),
                ])
                .send()
                .await?;
            if poll.status().is_success() {
                return Ok(poll.json().await?);
            }
            let error: TokenErrorResponse = poll.json().await.unwrap_or(TokenErrorResponse {
                error: String::new(),
            });
            match error.error.as_str() {
                "authorization_pending" | "slow_down" => {}
                other => {
                    return Err(NimbusError::LoginFailed {
                        message: format!("device code flow failed: {other}"),
                    });
                }
            }
        }
    }
}

/// Opens the system browser at the given address.
///
/// # Errors
///
/// Returns an error when no platform opener is available or it exits
/// non-zero.
fn open_browser(address: &str) -> Result<()> {
    let (program, args): (&str, Vec<&str>) = if cfg!(target_os = "macos") {
        ("open", vec![address])
    } else if cfg!(target_os = "windows") {
        ("rundll32", vec!["url.dll,FileProtocolHandler", address])
    } else if is_wsl() {
        ("wslview", vec![address])
    } else {
        ("xdg-open", vec![address])
    };
    let program = which::which(program).map_err(|_| NimbusError::NotFound {
        kind: "browser opener",
        id: program.to_owned(),
    })?;
    let status = std::process::Command::new(program)
        .args(args)
        .status()
        .map_err(|e| NimbusError::Io {
            path: std::path::PathBuf::from(address),
            source: e,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(NimbusError::LoginFailed {
            message: format!("browser opener exited with {status}"),
        })
    }
}

fn is_wsl() -> bool {
    std::fs::read_to_string("/proc/version")
        .map(|v| v.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_token_converts_to_oauth_token() {
        let wire = AzureToken {
            token_type: "Bearer".to_owned(),
            scope: String::new(),
            expires_in: 3600,
            access_token: "access".to_owned(),
            refresh_token: "refresh".to_owned(),
        };
        let token = wire.into_oauth_token();
        assert!(token.is_valid());
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expiry > Utc::now() + Duration::minutes(59));
    }

    #[test]
    fn expired_wire_token_is_invalid() {
        let wire = AzureToken {
            access_token: "access".to_owned(),
            ..AzureToken::default()
        };
        assert!(!wire.into_oauth_token().is_valid());
    }
}
