//! Thin REST client for the ARM container-group API.

use std::time::Duration;

use serde::Deserialize;

use nimbus_common::error::{NimbusError, Result};

use crate::context::AciContext;
use crate::login::AzureLoginService;
use crate::models::ContainerGroup;

/// Container-instance API version sent with every request.
pub const CONTAINER_GROUPS_API_VERSION: &str = "2019-12-01";

const PROVISIONING_POLL_INTERVAL: Duration = Duration::from_secs(5);
const PROVISIONING_POLL_ATTEMPTS: u32 = 120;

#[derive(Debug, Deserialize)]
struct ContainerGroupListResult {
    #[serde(default)]
    value: Vec<ContainerGroup>,
    #[serde(default, rename = "nextLink")]
    next_link: Option<String>,
}

/// Client for the container-group operations of one deployment target.
///
/// Each request fetches a valid bearer token from the login service, so a
/// token expiring mid-deployment is refreshed transparently.
pub struct ContainerGroupsClient<'a> {
    login: &'a AzureLoginService,
    context: AciContext,
    http: reqwest::Client,
}

impl<'a> ContainerGroupsClient<'a> {
    /// Creates a client scoped to the context's subscription and resource
    /// group.
    #[must_use]
    pub fn new(login: &'a AzureLoginService, context: AciContext) -> Self {
        Self {
            login,
            context,
            http: reqwest::Client::new(),
        }
    }

    async fn base_url(&self) -> Result<String> {
        let ce = self.login.cloud_environment().await?;
        Ok(format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups",
            ce.resource_manager_url, self.context.subscription_id, self.context.resource_group,
        ))
    }

    async fn bearer(&self) -> Result<String> {
        let (token, _) = self.login.valid_token().await?;
        Ok(token.access_token)
    }

    /// Fetches one container group.
    ///
    /// # Errors
    ///
    /// Returns [`NimbusError::NotFound`] when no group carries that name.
    pub async fn get(&self, name: &str) -> Result<ContainerGroup> {
        let url = format!(
            "{}/{name}?api-version={CONTAINER_GROUPS_API_VERSION}",
            self.base_url().await?
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NimbusError::NotFound {
                kind: "container group",
                id: name.to_owned(),
            });
        }
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Creates a container group, failing when one with the same name
    /// already exists.
    pub async fn create(&self, group: &ContainerGroup) -> Result<ContainerGroup> {
        match self.get(&group.name).await {
            Err(NimbusError::NotFound { .. }) => {}
            Err(other) => return Err(other),
            Ok(_) => {
                return Err(NimbusError::AlreadyExists {
                    kind: "container group",
                    id: group.name.clone(),
                });
            }
        }
        self.create_or_update(group).await
    }

    /// Creates or replaces a container group and waits for provisioning to
    /// settle.
    pub async fn create_or_update(&self, group: &ContainerGroup) -> Result<ContainerGroup> {
        let url = format!(
            "{}/{}?api-version={CONTAINER_GROUPS_API_VERSION}",
            self.base_url().await?,
            group.name,
        );
        let response = self
            .http
            .put(&url)
            .bearer_auth(self.bearer().await?)
            .json(group)
            .send()
            .await?
            .error_for_status()?;
        let accepted: ContainerGroup = response.json().await?;
        self.wait_for_provisioning(&accepted.name).await
    }

    /// Polls the group until its provisioning state is terminal.
    ///
    /// The wait is bounded; a group still pending after the last attempt is
    /// reported as a failure rather than polled forever.
    async fn wait_for_provisioning(&self, name: &str) -> Result<ContainerGroup> {
        for _ in 0..PROVISIONING_POLL_ATTEMPTS {
            let group = self.get(name).await?;
            match group.properties.provisioning_state.as_deref() {
                Some("Succeeded") => return Ok(group),
                Some(state @ ("Failed" | "Canceled")) => {
                    return Err(NimbusError::Forbidden {
                        message: format!(
                            "provisioning of container group {name:?} ended in state {state:?}"
                        ),
                    });
                }
                _ => {}
            }
            tokio::time::sleep(PROVISIONING_POLL_INTERVAL).await;
        }
        Err(NimbusError::Forbidden {
            message: format!("provisioning of container group {name:?} did not settle in time"),
        })
    }

    /// Lists all container groups of the resource group, re-fetching each
    /// one so the instance views are populated.
    pub async fn list(&self) -> Result<Vec<ContainerGroup>> {
        let mut url = format!(
            "{}?api-version={CONTAINER_GROUPS_API_VERSION}",
            self.base_url().await?
        );
        let mut names = Vec::new();
        loop {
            let response = self
                .http
                .get(&url)
                .bearer_auth(self.bearer().await?)
                .send()
                .await?
                .error_for_status()?;
            let page: ContainerGroupListResult = response.json().await?;
            names.extend(page.value.into_iter().map(|g| g.name));
            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        let mut groups = Vec::with_capacity(names.len());
        for name in names {
            groups.push(self.get(&name).await?);
        }
        Ok(groups)
    }

    /// Deletes a container group.
    ///
    /// # Errors
    ///
    /// Returns [`NimbusError::NotFound`] when no group carries that name.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let url = format!(
            "{}/{name}?api-version={CONTAINER_GROUPS_API_VERSION}",
            self.base_url().await?
        );
        let response = self
            .http
            .delete(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NimbusError::NotFound {
                kind: "container group",
                id: name.to_owned(),
            });
        }
        response.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_result_deserializes_with_and_without_next_link() {
        let raw = r#"{"value":[{"name":"app","location":"eu","properties":{"osType":"Linux","containers":[],"restartPolicy":"Always"}}],"nextLink":"https://next"}"#;
        let page: ContainerGroupListResult = serde_json::from_str(raw).unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("https://next"));

        let page: ContainerGroupListResult = serde_json::from_str(r#"{"value":[]}"#).unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }
}
