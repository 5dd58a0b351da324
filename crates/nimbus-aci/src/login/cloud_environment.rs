//! Azure sovereign cloud environment metadata.
//!
//! The four well-known clouds are built in; unknown names trigger a single
//! fetch of the cloud metadata endpoint per process, overridable via
//! `NIMBUS_CLOUD_METADATA_URL`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use nimbus_common::constants::CLOUD_METADATA_URL_VAR;
use nimbus_common::error::{NimbusError, Result};

/// Moniker of the Azure public cloud.
pub const AZURE_PUBLIC_CLOUD_NAME: &str = "AzureCloud";

/// Well-known suffix key for container registry login servers.
pub const ACR_SUFFIX_KEY: &str = "acrLoginServer";

/// Metadata service maintained by the Azure public cloud.
pub const DEFAULT_CLOUD_METADATA_URL: &str =
    "https://management.azure.com/metadata/endpoints?api-version=2019-05-01";

/// Authentication endpoints and audiences of a cloud environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEnvironmentAuthentication {
    /// Azure AD login endpoint.
    pub login_endpoint: String,
    /// Token audiences accepted by the cloud.
    pub audiences: Vec<String>,
    /// Default tenant moniker.
    #[serde(default)]
    pub tenant: String,
}

/// One Azure sovereign cloud (public, China, US government, German).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEnvironment {
    /// Environment name, e.g. `AzureCloud`.
    pub name: String,
    /// Authentication endpoints.
    pub authentication: CloudEnvironmentAuthentication,
    /// Resource manager (ARM) endpoint.
    #[serde(rename = "resourceManager")]
    pub resource_manager_url: String,
    /// Well-known DNS suffixes, keyed by suffix name.
    #[serde(default)]
    pub suffixes: BTreeMap<String, String>,
}

impl CloudEnvironment {
    /// URL listing the Azure AD tenants reachable with a management token.
    #[must_use]
    pub fn tenant_query_url(&self) -> String {
        format!("{}/tenants?api-version=2019-11-01", self.resource_manager_url)
    }

    /// Token scope fitting management API usage, including offline access
    /// so a refresh token is issued.
    #[must_use]
    pub fn token_scope(&self) -> String {
        format!("offline_access {}/.default", self.resource_manager_url)
    }

    /// Authorization code request URL for the interactive OAuth2 flow.
    #[must_use]
    pub fn authorize_url(&self, client_id: &str, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/organizations/oauth2/v2.0/authorize?response_type=code&client_id={client_id}&redirect_uri={redirect_uri}&state={state}&prompt=select_account&response_mode=query&scope={}",
            self.authentication.login_endpoint,
            self.token_scope(),
        )
    }

    /// Security token request URL for the given tenant.
    #[must_use]
    pub fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{tenant_id}/oauth2/v2.0/token",
            self.authentication.login_endpoint
        )
    }

    /// Device code request URL.
    #[must_use]
    pub fn device_code_url(&self) -> String {
        format!(
            "{}/organizations/oauth2/v2.0/devicecode",
            self.authentication.login_endpoint
        )
    }

    fn normalize_urls(&mut self) {
        self.resource_manager_url = trim_trailing_slash(&self.resource_manager_url);
        self.authentication.login_endpoint = trim_trailing_slash(&self.authentication.login_endpoint);
        for audience in &mut self.authentication.audiences {
            *audience = trim_trailing_slash(audience);
        }
    }
}

fn trim_trailing_slash(s: &str) -> String {
    s.trim_end_matches('/').to_owned()
}

#[derive(Debug)]
struct Inner {
    environments: BTreeMap<String, CloudEnvironment>,
    metadata_url: Option<String>,
    metadata_queried: bool,
}

/// Injected service exposing cloud environment metadata.
///
/// Constructed once in `main` and passed by reference through call chains;
/// there is no global instance.
#[derive(Debug)]
pub struct CloudEnvironmentService {
    inner: Mutex<Inner>,
}

impl Default for CloudEnvironmentService {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudEnvironmentService {
    /// Creates the service with the built-in sovereign clouds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                environments: builtin_environments(),
                metadata_url: None,
                metadata_queried: false,
            }),
        }
    }

    /// Creates the service with an explicit metadata endpoint, bypassing the
    /// environment variable lookup.
    #[must_use]
    pub fn with_metadata_url(metadata_url: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                environments: builtin_environments(),
                metadata_url: Some(metadata_url.into()),
                metadata_queried: false,
            }),
        }
    }

    /// Returns the named cloud environment.
    ///
    /// On a miss the metadata endpoint is queried, at most once per process.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` for an unknown environment and a
    /// parsing or HTTP error when the metadata endpoint misbehaves.
    pub async fn get(&self, name: &str) -> Result<CloudEnvironment> {
        {
            let inner = self.inner.lock().await;
            if let Some(ce) = inner.environments.get(name) {
                return Ok(ce.clone());
            }
        }

        self.query_metadata_once().await?;

        let inner = self.inner.lock().await;
        inner
            .environments
            .get(name)
            .cloned()
            .ok_or_else(|| NimbusError::NotFound {
                kind: "cloud environment",
                id: name.to_owned(),
            })
    }

    async fn query_metadata_once(&self) -> Result<()> {
        let metadata_url = {
            let mut inner = self.inner.lock().await;
            if inner.metadata_queried {
                return Ok(());
            }
            inner.metadata_queried = true;
            inner.metadata_url.clone().unwrap_or_else(|| {
                std::env::var(CLOUD_METADATA_URL_VAR)
                    .ok()
                    .filter(|v| url::Url::parse(v).is_ok())
                    .unwrap_or_else(|| DEFAULT_CLOUD_METADATA_URL.to_owned())
            })
        };

        tracing::debug!(url = %metadata_url, "querying cloud metadata");
        let response = reqwest::get(&metadata_url).await.map_err(|e| {
            NimbusError::ParsingFailed {
                message: format!("cloud metadata retrieval from {metadata_url:?} failed: {e}"),
            }
        })?;
        if !response.status().is_success() {
            return Err(NimbusError::ParsingFailed {
                message: format!(
                    "cloud metadata retrieval from {metadata_url:?} failed: server response was {}",
                    response.status()
                ),
            });
        }
        let payload: Vec<CloudEnvironment> =
            response.json().await.map_err(|e| NimbusError::ParsingFailed {
                message: format!("cloud metadata retrieval from {metadata_url:?} failed: {e}"),
            })?;

        let mut inner = self.inner.lock().await;
        apply_cloud_metadata(&mut inner.environments, payload)
    }
}

/// Validates a metadata payload and merges it into the known environments.
/// If any submitted entry is invalid, the whole payload is rejected.
fn apply_cloud_metadata(
    environments: &mut BTreeMap<String, CloudEnvironment>,
    payload: Vec<CloudEnvironment>,
) -> Result<()> {
    let mut validated = BTreeMap::new();
    for mut ce in payload {
        if ce.name.is_empty() {
            return Err(NimbusError::ParsingFailed {
                message: "cloud environment metadata has an environment with no name".to_owned(),
            });
        }
        ce.normalize_urls();
        if url::Url::parse(&ce.authentication.login_endpoint).is_err() {
            return Err(NimbusError::ParsingFailed {
                message: format!(
                    "cloud environment {:?} has an invalid login endpoint URL: {}",
                    ce.name, ce.authentication.login_endpoint
                ),
            });
        }
        if url::Url::parse(&ce.resource_manager_url).is_err() {
            return Err(NimbusError::ParsingFailed {
                message: format!(
                    "cloud environment {:?} has an invalid resource manager URL: {}",
                    ce.name, ce.resource_manager_url
                ),
            });
        }
        if ce.authentication.audiences.is_empty() {
            return Err(NimbusError::ParsingFailed {
                message: format!("cloud environment {:?} has no authentication audiences", ce.name),
            });
        }
        let _ = validated.insert(ce.name.clone(), ce);
    }
    environments.append(&mut validated);
    Ok(())
}

fn builtin_environments() -> BTreeMap<String, CloudEnvironment> {
    let azure_public = CloudEnvironment {
        name: AZURE_PUBLIC_CLOUD_NAME.to_owned(),
        authentication: CloudEnvironmentAuthentication {
            login_endpoint: "https://login.microsoftonline.com".to_owned(),
            audiences: vec![
                "https://management.core.windows.net".to_owned(),
                "https://management.azure.com".to_owned(),
            ],
            tenant: "common".to_owned(),
        },
        resource_manager_url: "https://management.azure.com".to_owned(),
        suffixes: BTreeMap::from([(ACR_SUFFIX_KEY.to_owned(), "azurecr.io".to_owned())]),
    };

    let azure_china = CloudEnvironment {
        name: "AzureChinaCloud".to_owned(),
        authentication: CloudEnvironmentAuthentication {
            login_endpoint: "https://login.chinacloudapi.cn".to_owned(),
            audiences: vec![
                "https://management.core.chinacloudapi.cn".to_owned(),
                "https://management.chinacloudapi.cn".to_owned(),
            ],
            tenant: "common".to_owned(),
        },
        resource_manager_url: "https://management.chinacloudapi.cn".to_owned(),
        suffixes: BTreeMap::from([(ACR_SUFFIX_KEY.to_owned(), "azurecr.cn".to_owned())]),
    };

    let azure_us_government = CloudEnvironment {
        name: "AzureUSGovernment".to_owned(),
        authentication: CloudEnvironmentAuthentication {
            login_endpoint: "https://login.microsoftonline.us".to_owned(),
            audiences: vec![
                "https://management.core.usgovcloudapi.net".to_owned(),
                "https://management.usgovcloudapi.net".to_owned(),
            ],
            tenant: "common".to_owned(),
        },
        resource_manager_url: "https://management.usgovcloudapi.net".to_owned(),
        suffixes: BTreeMap::from([(ACR_SUFFIX_KEY.to_owned(), "azurecr.us".to_owned())]),
    };

    // There is no separate container registry suffix for the German cloud.
    let azure_german = CloudEnvironment {
        name: "AzureGermanCloud".to_owned(),
        authentication: CloudEnvironmentAuthentication {
            login_endpoint: "https://login.microsoftonline.de".to_owned(),
            audiences: vec![
                "https://management.core.cloudapi.de".to_owned(),
                "https://management.microsoftazure.de".to_owned(),
            ],
            tenant: "common".to_owned(),
        },
        resource_manager_url: "https://management.microsoftazure.de".to_owned(),
        suffixes: BTreeMap::new(),
    };

    [azure_public, azure_china, azure_us_government, azure_german]
        .into_iter()
        .map(|ce| (ce.name.clone(), ce))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtin_clouds_are_available_without_metadata() {
        let service = CloudEnvironmentService::new();
        let ce = service.get(AZURE_PUBLIC_CLOUD_NAME).await.expect("public cloud");
        assert_eq!(ce.resource_manager_url, "https://management.azure.com");
        assert_eq!(
            ce.suffixes.get(ACR_SUFFIX_KEY).map(String::as_str),
            Some("azurecr.io")
        );
        assert!(service.get("AzureChinaCloud").await.is_ok());
        assert!(service.get("AzureUSGovernment").await.is_ok());
        assert!(service.get("AzureGermanCloud").await.is_ok());
    }

    #[test]
    fn derived_urls_follow_the_login_endpoint() {
        let service_urls = builtin_environments();
        let ce = service_urls.get(AZURE_PUBLIC_CLOUD_NAME).expect("public cloud");
        assert_eq!(
            ce.tenant_query_url(),
            "https://management.azure.com/tenants?api-version=2019-11-01"
        );
        assert_eq!(
            ce.token_scope(),
            "offline_access https://management.azure.com/.default"
        );
        assert_eq!(
            ce.token_url("tenant1"),
            "https://login.microsoftonline.com/tenant1/oauth2/v2.0/token"
        );
        assert!(ce
            .authorize_url("client", "http://localhost:8080", "state1")
            .starts_with("https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize?"));
    }

    #[test]
    fn metadata_with_unnamed_environment_is_rejected_whole() {
        let mut environments = builtin_environments();
        let valid = CloudEnvironment {
            name: "AzureExtraCloud".to_owned(),
            authentication: CloudEnvironmentAuthentication {
                login_endpoint: "https://login.extra.example".to_owned(),
                audiences: vec!["https://management.extra.example".to_owned()],
                tenant: "common".to_owned(),
            },
            resource_manager_url: "https://management.extra.example".to_owned(),
            suffixes: BTreeMap::new(),
        };
        let invalid = CloudEnvironment::default();
        let err = apply_cloud_metadata(&mut environments, vec![valid, invalid])
            .expect_err("invalid payload");
        assert!(matches!(err, NimbusError::ParsingFailed { .. }));
        assert!(!environments.contains_key("AzureExtraCloud"));
    }

    #[test]
    fn metadata_urls_are_normalized() {
        let mut environments = builtin_environments();
        let entry = CloudEnvironment {
            name: "AzureExtraCloud".to_owned(),
            authentication: CloudEnvironmentAuthentication {
                login_endpoint: "https://login.extra.example/".to_owned(),
                audiences: vec!["https://management.extra.example/".to_owned()],
                tenant: "common".to_owned(),
            },
            resource_manager_url: "https://management.extra.example/".to_owned(),
            suffixes: BTreeMap::new(),
        };
        apply_cloud_metadata(&mut environments, vec![entry]).expect("valid payload");
        let ce = environments.get("AzureExtraCloud").expect("merged");
        assert_eq!(ce.resource_manager_url, "https://management.extra.example");
        assert_eq!(ce.authentication.login_endpoint, "https://login.extra.example");
        assert_eq!(ce.authentication.audiences[0], "https://management.extra.example");
    }

    #[test]
    fn metadata_without_audiences_is_rejected() {
        let mut environments = builtin_environments();
        let entry = CloudEnvironment {
            name: "AzureExtraCloud".to_owned(),
            authentication: CloudEnvironmentAuthentication {
                login_endpoint: "https://login.extra.example".to_owned(),
                audiences: vec![],
                tenant: "common".to_owned(),
            },
            resource_manager_url: "https://management.extra.example".to_owned(),
            suffixes: BTreeMap::new(),
        };
        assert!(apply_cloud_metadata(&mut environments, vec![entry]).is_err());
    }
}
