//! Secret conversion: file or inline payloads become base64 secret volumes,
//! squashed per service and target directory.

use std::collections::BTreeMap;
use std::fs;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nimbus_common::error::{NimbusError, Result};
use nimbus_compose::types::{Project, ServiceConfig};

use crate::models::{Volume, VolumeMount};

/// Directory secrets are mounted under when the target is not absolute.
pub const DEFAULT_SECRETS_PATH: &str = "/run/secrets";

/// Prefix marking a secret declaration's `file` field as a literal payload.
pub const SECRET_INLINE_MARK: &str = "inline:";

const SERVICE_SECRET_PREFIX: &str = "aci-service-secret-path-";

fn service_secret_key(service_name: &str, target_dir: &str) -> String {
    format!(
        "{SERVICE_SECRET_PREFIX}-{service_name}--{}",
        target_dir.replace('/', "-")
    )
}

fn resolve_target(service: &str, source: &str, target: &str) -> Result<String> {
    let target = if target.is_empty() { source } else { target };
    if !target.starts_with('/') {
        if target.contains(['/', '\\']) {
            return Err(NimbusError::conversion(format!(
                "in service {service:?}, secret with source {source:?} cannot have a relative path as target. Only absolute paths are allowed. Found {target:?}"
            )));
        }
        return Ok(format!("{DEFAULT_SECRETS_PATH}/{target}"));
    }
    Ok(target.to_owned())
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_owned(),
        Some(index) => path[..index].to_owned(),
        None => ".".to_owned(),
    }
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_owned()
}

fn read_secret_data(project: &Project, source: &str) -> Result<Vec<u8>> {
    let declaration = project.secrets.get(source).ok_or_else(|| {
        NimbusError::conversion(format!("undefined secret {source:?}"))
    })?;
    if let Some(literal) = declaration.file.strip_prefix(SECRET_INLINE_MARK) {
        return Ok(literal.as_bytes().to_vec());
    }
    fs::read(&declaration.file).map_err(|source| NimbusError::Io {
        path: declaration.file.clone().into(),
        source,
    })
}

/// Builds one secret volume per service and target directory; multiple
/// secrets sharing a directory land in the same volume. Empty payloads are
/// skipped entirely.
pub(super) fn secret_volumes(project: &Project) -> Result<Vec<Volume>> {
    let mut volumes = Vec::new();
    for service in &project.services {
        let mut squashed: BTreeMap<String, Volume> = BTreeMap::new();
        for secret in &service.secrets {
            let data = read_secret_data(project, &secret.source)?;
            if data.is_empty() {
                continue;
            }
            let target = resolve_target(&service.name, &secret.source, &secret.target)?;
            let target_dir = parent_dir(&target);
            let volume = squashed.entry(target_dir.clone()).or_insert_with(|| Volume {
                name: service_secret_key(&service.name, &target_dir),
                azure_file: None,
                secret: Some(BTreeMap::new()),
            });
            if let Some(entries) = volume.secret.as_mut() {
                entries.insert(file_name(&target), BASE64.encode(&data));
            }
        }
        volumes.extend(squashed.into_values());
    }
    Ok(volumes)
}

/// Builds the read-only mounts matching [`secret_volumes`] for one service,
/// one mount per distinct target directory.
pub(super) fn secret_volume_mounts(service: &ServiceConfig) -> Result<Vec<VolumeMount>> {
    let mut mounts: Vec<VolumeMount> = Vec::new();
    let mut seen: BTreeMap<String, ()> = BTreeMap::new();
    for secret in &service.secrets {
        let target = resolve_target(&service.name, &secret.source, &secret.target)?;
        let target_dir = parent_dir(&target);
        if seen.insert(target_dir.clone(), ()).is_none() {
            mounts.push(VolumeMount {
                name: service_secret_key(&service.name, &target_dir),
                mount_path: target_dir,
                read_only: Some(true),
            });
        }
    }
    validate_mount_path_collisions(&mounts)?;
    Ok(mounts)
}

/// Rejects mount paths where one is a path-component prefix of another,
/// which ACI cannot mount.
fn validate_mount_path_collisions(mounts: &[VolumeMount]) -> Result<()> {
    for (i, first) in mounts.iter().enumerate() {
        for (j, second) in mounts.iter().enumerate() {
            if i == j {
                continue;
            }
            let a: Vec<&str> = first.mount_path.split('/').collect();
            let b: Vec<&str> = second.mount_path.split('/').collect();
            let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
            if shorter.iter().zip(longer.iter()).all(|(s, l)| s == l) {
                return Err(NimbusError::conversion(format!(
                    "mount paths {:?} and {:?} collide. A volume mount cannot include another one.",
                    first.mount_path, second.mount_path
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_compose::types::{SecretConfig, ServiceSecretConfig};

    fn project_with_secrets(
        secrets: Vec<(&str, &str)>,
        service_secrets: Vec<(&str, &str)>,
    ) -> Project {
        Project {
            name: "app".to_owned(),
            services: vec![ServiceConfig {
                name: "web".to_owned(),
                secrets: service_secrets
                    .into_iter()
                    .map(|(source, target)| ServiceSecretConfig {
                        source: source.to_owned(),
                        target: target.to_owned(),
                    })
                    .collect(),
                ..ServiceConfig::default()
            }],
            volumes: BTreeMap::new(),
            secrets: secrets
                .into_iter()
                .map(|(name, file)| {
                    (
                        name.to_owned(),
                        SecretConfig {
                            file: file.to_owned(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn default_target_lands_under_run_secrets() {
        let project = project_with_secrets(
            vec![("token", "inline:hunter2")],
            vec![("token", "")],
        );
        let mounts = secret_volume_mounts(&project.services[0]).unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, DEFAULT_SECRETS_PATH);
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(
            mounts[0].name,
            "aci-service-secret-path--web---run-secrets"
        );

        let volumes = secret_volumes(&project).unwrap();
        assert_eq!(volumes.len(), 1);
        let entries = volumes[0].secret.as_ref().unwrap();
        assert_eq!(entries["token"], BASE64.encode("hunter2"));
    }

    #[test]
    fn secrets_sharing_a_directory_are_squashed() {
        let project = project_with_secrets(
            vec![("one", "inline:1"), ("two", "inline:2")],
            vec![("one", "/etc/app/one.txt"), ("two", "/etc/app/two.txt")],
        );
        let volumes = secret_volumes(&project).unwrap();
        assert_eq!(volumes.len(), 1);
        let entries = volumes[0].secret.as_ref().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["one.txt"], BASE64.encode("1"));
        assert_eq!(entries["two.txt"], BASE64.encode("2"));

        let mounts = secret_volume_mounts(&project.services[0]).unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, "/etc/app");
    }

    #[test]
    fn empty_payloads_are_skipped() {
        let project = project_with_secrets(vec![("empty", "inline:")], vec![("empty", "")]);
        assert!(secret_volumes(&project).unwrap().is_empty());
    }

    #[test]
    fn relative_path_target_is_rejected() {
        let project = project_with_secrets(
            vec![("token", "inline:x")],
            vec![("token", "nested/dir/token")],
        );
        let err = secret_volumes(&project).unwrap_err();
        assert!(err.to_string().contains("Only absolute paths are allowed"));
    }

    #[test]
    fn prefixed_mount_paths_collide() {
        let project = project_with_secrets(
            vec![("a", "inline:a"), ("b", "inline:b")],
            vec![("a", "/etc/app/a"), ("b", "/etc/app/nested/b")],
        );
        let err = secret_volume_mounts(&project.services[0]).unwrap_err();
        assert!(err.to_string().contains("collide"));
    }

    #[test]
    fn file_backed_secret_is_read_and_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.txt");
        std::fs::write(&path, b"s3cret").unwrap();
        let project = project_with_secrets(
            vec![("file_secret", path.to_str().unwrap())],
            vec![("file_secret", "")],
        );
        let volumes = secret_volumes(&project).unwrap();
        let entries = volumes[0].secret.as_ref().unwrap();
        assert_eq!(entries["file_secret"], BASE64.encode("s3cret"));
    }
}
