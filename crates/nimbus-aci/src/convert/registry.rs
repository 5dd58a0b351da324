//! Registry credential resolution for image pulls.
//!
//! Credentials come from the local Docker config file, filtered down to the
//! registries the project actually references. ACR registries additionally
//! get an automatic `docker login` from the stored Azure credentials.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nimbus_common::error::{NimbusError, Result};
use nimbus_compose::types::Project;
use serde::Deserialize;
use url::Url;

use crate::login::cloud_environment::{CloudEnvironment, ACR_SUFFIX_KEY};
use crate::login::AzureLoginService;
use crate::models::ImageRegistryCredential;

/// Placeholder username ACR expects alongside a refresh token.
pub const ACR_TOKEN_USERNAME: &str = "00000000-0000-0000-0000-000000000000";

/// Registry assumed for image names without an explicit registry host.
pub const DOCKER_HUB: &str = "index.docker.io";

/// One `auths` entry of the Docker config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Base64-encoded `user:password` pair.
    #[serde(default)]
    pub auth: String,
    /// Explicit username.
    #[serde(default)]
    pub username: String,
    /// Explicit password.
    #[serde(default)]
    pub password: String,
    /// Identity token issued by `docker login` against token-based
    /// registries.
    #[serde(default, rename = "identitytoken")]
    pub identity_token: String,
}

impl AuthConfig {
    /// Fills username and password from the packed `auth` field when they
    /// are not set explicitly.
    fn resolved(mut self) -> Self {
        if self.username.is_empty() && self.password.is_empty() && !self.auth.is_empty() {
            if let Ok(decoded) = BASE64.decode(&self.auth) {
                if let Ok(text) = String::from_utf8(decoded) {
                    if let Some((user, pass)) = text.split_once(':') {
                        self.username = user.to_owned();
                        self.password = pass.to_owned();
                    }
                }
            }
        }
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthConfig>,
}

/// Source of local registry credentials, plus the ACR auto-login hook.
#[async_trait]
pub trait RegistryHelper: Send + Sync {
    /// All credentials the local Docker configuration knows about.
    fn all_registry_credentials(&self) -> Result<BTreeMap<String, AuthConfig>>;

    /// Logs the local Docker CLI in to an ACR registry using the stored
    /// Azure credentials.
    async fn auto_login_acr(&self, registry: &str, login: &AzureLoginService) -> Result<()>;
}

/// [`RegistryHelper`] backed by `~/.docker/config.json` and the `docker`
/// binary.
#[derive(Debug, Default)]
pub struct CliRegistryHelper;

impl CliRegistryHelper {
    fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }
}

#[async_trait]
impl RegistryHelper for CliRegistryHelper {
    fn all_registry_credentials(&self) -> Result<BTreeMap<String, AuthConfig>> {
        let Some(path) = Self::config_path() else {
            return Ok(BTreeMap::new());
        };
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(source) => return Err(NimbusError::Io { path, source }),
        };
        let config: DockerConfigFile = serde_json::from_slice(&raw)?;
        Ok(config
            .auths
            .into_iter()
            .map(|(name, auth)| (name, auth.resolved()))
            .collect())
    }

    async fn auto_login_acr(&self, registry: &str, login: &AzureLoginService) -> Result<()> {
        let (token, tenant_id) = login.valid_token().await?;

        let form = [
            ("grant_type", "access_token"),
            ("service", registry),
            ("tenant", &tenant_id),
            ("access_token", &token.access_token),
        ];
        let response = reqwest::Client::new()
            .post(format!("https://{registry}/oauth2/exchange"))
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(NimbusError::LoginFailed {
                message: format!(
                    "could not obtain ACR token from Azure login, status: {status}, response: {body}"
                ),
            });
        }

        #[derive(Deserialize)]
        struct AcrToken {
            refresh_token: String,
        }
        let acr_token: AcrToken = serde_json::from_str(&body)?;

        let output = tokio::process::Command::new("docker")
            .args([
                "login",
                "-u",
                ACR_TOKEN_USERNAME,
                "-p",
                &acr_token.refresh_token,
                registry,
            ])
            .output()
            .await
            .map_err(|source| NimbusError::Io {
                path: PathBuf::from("docker"),
                source,
            })?;
        if !output.status.success() {
            return Err(NimbusError::LoginFailed {
                message: format!(
                    "could not 'docker login' to {registry}:\n{}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(())
    }
}

/// Resolves the image registry credentials a project needs.
///
/// ACR auto-login failures are downgraded to warnings on the assumption
/// that the user already logged in to the registry by hand.
pub async fn resolve_registry_credentials(
    project: &Project,
    helper: &dyn RegistryHelper,
    login: &AzureLoginService,
) -> Result<Vec<ImageRegistryCredential>> {
    let cloud_environment = login.cloud_environment().await.ok();
    let (used_registries, acr_registries) =
        used_registries(project, cloud_environment.as_ref());

    for registry in &acr_registries {
        if let Err(err) = helper.auto_login_acr(registry, login).await {
            tracing::warn!(%registry, error = %err, "ACR auto-login failed");
            tracing::warn!(
                "could not automatically login to {registry} from your Azure login, assuming you already logged in to the ACR registry"
            );
        }
    }

    let all_credentials = helper.all_registry_credentials()?;
    let mut credentials = Vec::new();
    for (name, auth) in all_credentials {
        // Config files accumulate odd entries over time; anything that does
        // not resolve to a hostname is skipped rather than reported.
        let Some(hostname) = credential_hostname(&name) else {
            continue;
        };
        if !used_registries.contains(&hostname) {
            continue;
        }
        if !auth.password.is_empty() {
            credentials.push(ImageRegistryCredential {
                server: hostname,
                username: auth.username,
                password: auth.password,
            });
        } else if !auth.identity_token.is_empty() {
            let username = if auth.username.is_empty() {
                ACR_TOKEN_USERNAME.to_owned()
            } else {
                auth.username
            };
            credentials.push(ImageRegistryCredential {
                server: hostname,
                username,
                password: auth.identity_token,
            });
        }
    }
    Ok(credentials)
}

/// Extracts the host a credential entry refers to; entries are keyed by
/// either a bare hostname or a full URL.
fn credential_hostname(name: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(name) {
        if let Some(host) = parsed.host_str() {
            return Some(host.to_owned());
        }
    }
    name.split('/').next().map(str::to_owned)
}

/// Classifies the registries the project's images come from.
///
/// Image names without a registry host, including ones like `user/image`
/// where the first token has no dot, belong to Docker Hub. Registries whose
/// host carries the cloud environment's ACR suffix are additionally listed
/// for auto-login.
fn used_registries(
    project: &Project,
    cloud_environment: Option<&CloudEnvironment>,
) -> (BTreeSet<String>, Vec<String>) {
    let mut used = BTreeSet::new();
    let mut acr = Vec::new();
    for service in &project.services {
        let first_token = service.image.split('/').next().unwrap_or_default();
        let registry = if !service.image.contains('/') || !first_token.contains('.') {
            DOCKER_HUB.to_owned()
        } else {
            let is_acr = cloud_environment
                .and_then(|ce| ce.suffixes.get(ACR_SUFFIX_KEY))
                .is_some_and(|suffix| first_token.ends_with(suffix.as_str()));
            if is_acr && !acr.iter().any(|r| r == first_token) {
                acr.push(first_token.to_owned());
            }
            first_token.to_owned()
        };
        used.insert(registry);
    }
    (used, acr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_compose::types::ServiceConfig;

    fn project(images: &[&str]) -> Project {
        Project {
            name: "app".to_owned(),
            services: images
                .iter()
                .map(|image| ServiceConfig {
                    name: "svc".to_owned(),
                    image: (*image).to_owned(),
                    ..ServiceConfig::default()
                })
                .collect(),
            volumes: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    fn public_cloud() -> CloudEnvironment {
        CloudEnvironment {
            suffixes: BTreeMap::from([(ACR_SUFFIX_KEY.to_owned(), "azurecr.io".to_owned())]),
            ..CloudEnvironment::default()
        }
    }

    #[test]
    fn bare_image_names_belong_to_docker_hub() {
        let (used, acr) = used_registries(&project(&["nginx", "user/image"]), None);
        assert_eq!(used, BTreeSet::from([DOCKER_HUB.to_owned()]));
        assert!(acr.is_empty());
    }

    #[test]
    fn dotted_first_token_is_a_registry_host() {
        let (used, acr) = used_registries(
            &project(&["ghcr.io/org/image", "myacr.azurecr.io/image"]),
            Some(&public_cloud()),
        );
        assert_eq!(
            used,
            BTreeSet::from(["ghcr.io".to_owned(), "myacr.azurecr.io".to_owned()])
        );
        assert_eq!(acr, vec!["myacr.azurecr.io".to_owned()]);
    }

    #[test]
    fn acr_suffix_is_not_matched_without_cloud_environment() {
        let (_, acr) = used_registries(&project(&["myacr.azurecr.io/image"]), None);
        assert!(acr.is_empty());
    }

    #[test]
    fn credential_hostname_handles_urls_and_bare_hosts() {
        assert_eq!(
            credential_hostname("https://index.docker.io/v1/"),
            Some("index.docker.io".to_owned())
        );
        assert_eq!(
            credential_hostname("myacr.azurecr.io"),
            Some("myacr.azurecr.io".to_owned())
        );
    }

    #[test]
    fn packed_auth_field_resolves_to_username_and_password() {
        let auth = AuthConfig {
            auth: BASE64.encode("user:pass"),
            ..AuthConfig::default()
        }
        .resolved();
        assert_eq!(auth.username, "user");
        assert_eq!(auth.password, "pass");
    }

    #[test]
    fn docker_config_auths_deserialize() {
        let raw = r#"{"auths":{"myacr.azurecr.io":{"identitytoken":"tok"},"https://index.docker.io/v1/":{"auth":"dXNlcjpwYXNz"}}}"#;
        let config: DockerConfigFile = serde_json::from_str(raw).unwrap();
        assert_eq!(config.auths.len(), 2);
        assert_eq!(config.auths["myacr.azurecr.io"].identity_token, "tok");
    }
}
