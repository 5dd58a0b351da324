//! Azure AD login, token persistence, and cloud environment metadata.
//!
//! The login flow races an interactive browser redirect against the device
//! code flow and persists the winning token; every subsequent command reads
//! the store and silently refreshes the token when it has expired.

pub mod api;
pub mod cloud_environment;
pub mod local_server;
pub mod storage;
pub mod token_store;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use nimbus_common::error::{NimbusError, Result};

use crate::login::api::{ApiHelper, AzureApiClient, AzureToken};
use crate::login::cloud_environment::{CloudEnvironment, CloudEnvironmentService};
use crate::login::local_server::LocalServer;
use crate::login::token_store::{OAuthToken, TokenInfo, TokenStore};

/// Azure CLI client ID, reused so no app registration is required.
pub const CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

#[derive(Debug, Deserialize)]
struct TenantResult {
    value: Vec<TenantValue>,
}

#[derive(Debug, Deserialize)]
struct TenantValue {
    #[serde(rename = "tenantId")]
    tenant_id: String,
}

/// Service logging into Azure and producing tokens for the management APIs.
pub struct AzureLoginService {
    token_store: TokenStore,
    api: Arc<dyn ApiHelper>,
    cloud_environments: CloudEnvironmentService,
}

impl AzureLoginService {
    /// Creates a login service backed by the default token store path and
    /// the live Azure API.
    ///
    /// # Errors
    ///
    /// Returns an error if the token store directory cannot be created.
    pub fn new(cloud_environments: CloudEnvironmentService) -> Result<Self> {
        Ok(Self::with_parts(
            TokenStore::open(nimbus_common::constants::default_token_store_path())?,
            Arc::new(AzureApiClient::new()),
            cloud_environments,
        ))
    }

    /// Creates a login service from explicit collaborators.
    #[must_use]
    pub fn with_parts(
        token_store: TokenStore,
        api: Arc<dyn ApiHelper>,
        cloud_environments: CloudEnvironmentService,
    ) -> Self {
        Self {
            token_store,
            api,
            cloud_environments,
        }
    }

    /// Performs an interactive Azure login.
    ///
    /// A loopback redirect server is started and the system browser is
    /// pointed at the authorization page; when the browser cannot be opened
    /// the device code flow is started instead. The first flow to deliver a
    /// result wins. Ctrl-C cancels the wait.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::LoginFailed` when no token could be obtained or
    /// the requested tenant is not accessible, and `NimbusError::Canceled`
    /// on interruption.
    pub async fn login(&self, requested_tenant: Option<&str>, cloud_name: &str) -> Result<()> {
        let ce = self.cloud_environments.get(cloud_name).await?;

        let (server, mut query_rx) = LocalServer::start().await?;
        let redirect_url = server.addr();

        let (device_tx, mut device_rx) = tokio::sync::mpsc::channel::<Result<AzureToken>>(1);
        if let Err(err) = self.api.open_login_page(&redirect_url, &ce) {
            tracing::warn!(
                error = %err,
                "could not open a browser, falling back to device code flow"
            );
            let api = Arc::clone(&self.api);
            let flow_ce = ce.clone();
            drop(tokio::spawn(async move {
                let _ = device_tx.send(api.device_code_token(&flow_ce).await).await;
            }));
        }

        let (access_token, refresh_token) = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Err(NimbusError::Canceled),
            device = device_rx.recv() => {
                let token = device
                    .ok_or_else(|| login_failed("device code flow ended without a token"))?
                    .map_err(|e| login_failed(format!("could not get token using device code flow: {e}")))?;
                (token.access_token, token.refresh_token)
            }
            query = query_rx.recv() => {
                let response = query
                    .ok_or_else(|| login_failed("login server closed unexpectedly"))??;
                let token = self.exchange_login_code(&response, &redirect_url, &ce).await?;
                (token.access_token, token.refresh_token)
            }
        };

        self.validate_tenant_and_persist(&access_token, &refresh_token, requested_tenant, &ce)
            .await
    }

    async fn exchange_login_code(
        &self,
        query: &HashMap<String, String>,
        redirect_url: &str,
        ce: &CloudEnvironment,
    ) -> Result<AzureToken> {
        let code = query
            .get("code")
            .ok_or_else(|| login_failed("no login code in the redirect"))?;
        let data = vec![
            ("grant_type".to_owned(), "authorization_code".to_owned()),
            ("client_id".to_owned(), CLIENT_ID.to_owned()),
            ("code".to_owned(), code.clone()),
            ("scope".to_owned(), ce.token_scope()),
            ("redirect_uri".to_owned(), redirect_url.to_owned()),
        ];
        self.api
            .query_token(ce, &data, "organizations")
            .await
            .map_err(|e| login_failed(format!("access token request failed: {e}")))
    }

    /// Logs in with a service principal. The resulting token carries no
    /// refresh token.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::LoginFailed` when the credentials are rejected.
    pub async fn login_service_principal(
        &self,
        client_id: &str,
        client_secret: &str,
        tenant_id: &str,
        cloud_name: &str,
    ) -> Result<()> {
        let ce = self.cloud_environments.get(cloud_name).await?;
        let data = vec![
            ("grant_type".to_owned(), "client_credentials".to_owned()),
            ("client_id".to_owned(), client_id.to_owned()),
            ("client_secret".to_owned(), client_secret.to_owned()),
            ("scope".to_owned(), format!("{}/.default", ce.resource_manager_url)),
        ];
        let token = self
            .api
            .query_token(&ce, &data, tenant_id)
            .await
            .map_err(|e| login_failed(format!("could not login with service principal: {e}")))?;
        self.token_store.write(&TokenInfo {
            tenant_id: tenant_id.to_owned(),
            token: token.into_oauth_token(),
            cloud_environment: ce.name,
        })
    }

    /// Removes persisted Azure login data.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` if there is nothing to remove.
    pub fn logout(&self) -> Result<()> {
        self.token_store.remove()
    }

    /// Returns the cloud environment associated with the persisted token.
    ///
    /// # Errors
    ///
    /// Returns an error when no token is stored or its environment is
    /// unknown.
    pub async fn cloud_environment(&self) -> Result<CloudEnvironment> {
        let info = self.token_store.read()?;
        self.cloud_environments.get(&info.cloud_environment).await
    }

    /// Returns a valid access token and the associated tenant ID, silently
    /// refreshing the persisted token when it has expired.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::LoginRequired` when no usable token exists and
    /// the refresh grant fails.
    pub async fn valid_token(&self) -> Result<(OAuthToken, String)> {
        let info = self.token_store.read().map_err(|_| NimbusError::LoginRequired {
            message: "no stored Azure credentials, run `nimbus login` first".to_owned(),
        })?;
        if info.token.is_valid() {
            return Ok((info.token, info.tenant_id));
        }

        let ce = self
            .cloud_environments
            .get(&info.cloud_environment)
            .await
            .map_err(|e| NimbusError::LoginRequired {
                message: format!("cloud environment could not be determined: {e}"),
            })?;

        let token = self
            .refresh_token(&info.token.refresh_token, &info.tenant_id, &ce)
            .await
            .map_err(|_| NimbusError::LoginRequired {
                message: "access token refresh failed, you need to login to Azure again".to_owned(),
            })?;
        self.token_store.write(&TokenInfo {
            tenant_id: info.tenant_id.clone(),
            token: token.clone(),
            cloud_environment: ce.name,
        })?;
        Ok((token, info.tenant_id))
    }

    async fn validate_tenant_and_persist(
        &self,
        access_token: &str,
        refresh_token: &str,
        requested_tenant: Option<&str>,
        ce: &CloudEnvironment,
    ) -> Result<()> {
        let (body, status) = self
            .api
            .query_api_with_header(&ce.tenant_query_url(), &format!("Bearer {access_token}"))
            .await
            .map_err(|e| login_failed(format!("check auth failed: {e}")))?;
        if status != 200 {
            return Err(login_failed(format!(
                "unable to login, status code {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        let tenants: TenantResult = serde_json::from_slice(&body)
            .map_err(|e| login_failed(format!("unable to unmarshal tenant: {e}")))?;
        let tenant_id = select_tenant(&tenants.value, requested_tenant)?;

        let token = self
            .refresh_token(refresh_token, &tenant_id, ce)
            .await
            .map_err(|e| login_failed(format!("unable to refresh token: {e}")))?;
        self.token_store.write(&TokenInfo {
            tenant_id,
            token,
            cloud_environment: ce.name.clone(),
        })
    }

    async fn refresh_token(
        &self,
        current_refresh_token: &str,
        tenant_id: &str,
        ce: &CloudEnvironment,
    ) -> Result<OAuthToken> {
        let data = vec![
            ("grant_type".to_owned(), "refresh_token".to_owned()),
            ("client_id".to_owned(), CLIENT_ID.to_owned()),
            ("scope".to_owned(), ce.token_scope()),
            ("refresh_token".to_owned(), current_refresh_token.to_owned()),
        ];
        let token = self.api.query_token(ce, &data, tenant_id).await?;
        Ok(token.into_oauth_token())
    }
}

fn login_failed(message: impl Into<String>) -> NimbusError {
    NimbusError::LoginFailed {
        message: message.into(),
    }
}

fn select_tenant(tenants: &[TenantValue], requested: Option<&str>) -> Result<String> {
    match requested {
        None => tenants
            .first()
            .map(|t| t.tenant_id.clone())
            .ok_or_else(|| login_failed("could not find azure tenant")),
        Some(requested) => tenants
            .iter()
            .find(|t| t.tenant_id == requested)
            .map(|t| t.tenant_id.clone())
            .ok_or_else(|| login_failed(format!("could not find requested azure tenant {requested}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantValue {
        TenantValue {
            tenant_id: id.to_owned(),
        }
    }

    #[test]
    fn select_tenant_defaults_to_first() {
        let tenants = vec![tenant("t1"), tenant("t2")];
        assert_eq!(select_tenant(&tenants, None).expect("tenant"), "t1");
    }

    #[test]
    fn select_tenant_honors_request() {
        let tenants = vec![tenant("t1"), tenant("t2")];
        assert_eq!(select_tenant(&tenants, Some("t2")).expect("tenant"), "t2");
    }

    #[test]
    fn select_tenant_rejects_unknown_request() {
        let tenants = vec![tenant("t1")];
        let err = select_tenant(&tenants, Some("t3")).expect_err("unknown");
        assert!(matches!(err, NimbusError::LoginFailed { .. }));
    }

    #[test]
    fn select_tenant_requires_at_least_one() {
        let err = select_tenant(&[], None).expect_err("empty");
        assert!(matches!(err, NimbusError::LoginFailed { .. }));
    }
}
