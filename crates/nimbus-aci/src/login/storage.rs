//! Storage account key lookup used by Azure File volume conversion.

use async_trait::async_trait;
use serde::Deserialize;

use nimbus_common::error::{NimbusError, Result};

use crate::context::AciContext;
use crate::login::AzureLoginService;

/// Collaborator resolving storage account keys for volume mounts.
#[async_trait]
pub trait StorageLogin: Send + Sync {
    /// Returns the primary key of the named storage account.
    async fn storage_account_key(&self, account_name: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ListKeysResult {
    #[serde(default)]
    keys: Vec<StorageAccountKey>,
}

#[derive(Debug, Deserialize)]
struct StorageAccountKey {
    value: String,
}

/// Live implementation calling the ARM storage `listKeys` operation with the
/// current Azure login.
pub struct StorageAccountHelper<'a> {
    login: &'a AzureLoginService,
    context: AciContext,
    http: reqwest::Client,
}

impl<'a> StorageAccountHelper<'a> {
    /// Creates the helper for one deployment target.
    #[must_use]
    pub fn new(login: &'a AzureLoginService, context: AciContext) -> Self {
        Self {
            login,
            context,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StorageLogin for StorageAccountHelper<'_> {
    async fn storage_account_key(&self, account_name: &str) -> Result<String> {
        let (token, _) = self.login.valid_token().await?;
        let ce = self.login.cloud_environment().await?;
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{account_name}/listKeys?api-version=2019-06-01",
            ce.resource_manager_url, self.context.subscription_id, self.context.resource_group,
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NimbusError::Forbidden {
                message: format!(
                    "could not access storage account keys for {account_name} using the azure login, status: {}",
                    response.status()
                ),
            });
        }
        let result: ListKeysResult = response.json().await?;
        result
            .keys
            .into_iter()
            .next()
            .map(|k| k.value)
            .ok_or_else(|| NimbusError::NotFound {
                kind: "storage account key",
                id: account_name.to_owned(),
            })
    }
}
