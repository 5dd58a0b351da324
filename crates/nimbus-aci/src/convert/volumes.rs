//! Azure File volume conversion and `run --volume` specification parsing.

use std::collections::BTreeMap;

use nimbus_common::error::{NimbusError, Result};
use nimbus_compose::types::{
    Project, ServiceConfig, ServiceVolumeConfig, VolumeConfig, VolumeMountType,
};

use crate::login::storage::StorageLogin;
use crate::models::{AzureFileVolume, Volume, VolumeMount};

/// Driver name marking a volume as an Azure File share.
pub const AZURE_FILE_DRIVER_NAME: &str = "azure_file";

/// Driver option holding the file share name.
pub const DRIVER_OPT_SHARE_NAME: &str = "share_name";

/// Driver option holding the storage account name.
pub const DRIVER_OPT_ACCOUNT_NAME: &str = "storage_account_name";

/// Driver option marking the share read-only.
pub const DRIVER_OPT_READ_ONLY: &str = "read_only";

/// Converts the project's `azure_file` volume declarations into ACI volumes,
/// fetching each storage account key through the login service.
pub(super) async fn file_volumes(
    project: &Project,
    storage: &dyn StorageLogin,
) -> Result<Vec<Volume>> {
    let mut aci_volumes = Vec::new();
    for (name, volume) in &project.volumes {
        if volume.driver != AZURE_FILE_DRIVER_NAME {
            continue;
        }
        let share_name = volume.driver_opts.get(DRIVER_OPT_SHARE_NAME).ok_or_else(|| {
            NimbusError::conversion("cannot retrieve fileshare name for Azurefile")
        })?;
        let account_name = volume.driver_opts.get(DRIVER_OPT_ACCOUNT_NAME).ok_or_else(|| {
            NimbusError::conversion("cannot retrieve account name for Azurefile")
        })?;
        let read_only = match volume.driver_opts.get(DRIVER_OPT_READ_ONLY) {
            None => false,
            Some(raw) => raw.parse::<bool>().map_err(|_| {
                NimbusError::conversion(format!("invalid mode {raw:?} for volume"))
            })?,
        };
        let account_key = storage.storage_account_key(account_name).await?;
        aci_volumes.push(Volume {
            name: name.clone(),
            azure_file: Some(AzureFileVolume {
                share_name: share_name.clone(),
                storage_account_name: account_name.clone(),
                storage_account_key: account_key,
                read_only,
            }),
            secret: None,
        });
    }
    Ok(aci_volumes)
}

/// Converts one service's volume mounts.
///
/// Bind mounts have no ACI counterpart and are rejected with a pointer to
/// the `volumes` section.
pub(super) fn file_volume_mounts(service: &ServiceConfig) -> Result<Vec<VolumeMount>> {
    let mut mounts = Vec::with_capacity(service.volumes.len());
    for volume in &service.volumes {
        if volume.mount_type == VolumeMountType::Bind {
            return Err(NimbusError::conversion(format!(
                "host path ({:?}) not allowed as volume source, you need to reference an Azure File Share defined in the 'volumes' section",
                volume.source
            )));
        }
        mounts.push(VolumeMount {
            name: volume.source.clone(),
            mount_path: volume.target.clone(),
            read_only: None,
        });
    }
    Ok(mounts)
}

/// Volume and mount declarations for a single-service project built from
/// `run --volume` flags.
pub fn run_volumes(
    specs: &[String],
) -> Result<(BTreeMap<String, VolumeConfig>, Vec<ServiceVolumeConfig>)> {
    let mut project_volumes = BTreeMap::new();
    let mut service_volumes = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let input = VolumeInput::parse(format!("volume-{index}"), spec)?;
        let mut driver_opts = BTreeMap::new();
        driver_opts.insert(DRIVER_OPT_ACCOUNT_NAME.to_owned(), input.storage_account);
        driver_opts.insert(DRIVER_OPT_SHARE_NAME.to_owned(), input.fileshare);
        driver_opts.insert(DRIVER_OPT_READ_ONLY.to_owned(), input.read_only.to_string());
        project_volumes.insert(
            input.name.clone(),
            VolumeConfig {
                name: input.name.clone(),
                driver: AZURE_FILE_DRIVER_NAME.to_owned(),
                driver_opts,
            },
        );
        service_volumes.push(ServiceVolumeConfig {
            mount_type: VolumeMountType::AzureFile,
            source: input.name,
            target: input.target,
            read_only: input.read_only,
        });
    }
    Ok((project_volumes, service_volumes))
}

/// One parsed `run --volume` specification.
///
/// Specifications take the form `<source>[:<target>][:<permissions>]` where
/// the source is `<storage account>/<fileshare>`. A missing target defaults
/// to `/run/volumes/<fileshare>`, and permissions (`ro` or `rw`) can only
/// follow an explicit target.
struct VolumeInput {
    name: String,
    storage_account: String,
    fileshare: String,
    target: String,
    read_only: bool,
}

impl VolumeInput {
    fn parse(name: String, candidate: &str) -> Result<Self> {
        let tokens: Vec<&str> = candidate.split(':').collect();
        let source_tokens: Vec<&str> = tokens[0].split('/').collect();
        if source_tokens.len() != 2 || source_tokens[0].is_empty() {
            return Err(NimbusError::ParsingFailed {
                message: format!(
                    "volume specification {candidate:?} does not include a storage account before '/'"
                ),
            });
        }
        if source_tokens[1].is_empty() {
            return Err(NimbusError::ParsingFailed {
                message: format!(
                    "volume specification {candidate:?} does not include a storage file fileshare after '/'"
                ),
            });
        }
        let storage_account = source_tokens[0].to_owned();
        let fileshare = source_tokens[1].to_owned();

        let (target, read_only) = match tokens.len() {
            1 => (format!("/run/volumes/{fileshare}"), false),
            2 => (tokens[1].to_owned(), false),
            3 => {
                let permissions = tokens[2].to_lowercase();
                if permissions != "ro" && permissions != "rw" {
                    return Err(NimbusError::ParsingFailed {
                        message: format!(
                            "volume specification {candidate:?} has an invalid mode {permissions:?}"
                        ),
                    });
                }
                (tokens[1].to_owned(), permissions == "ro")
            }
            _ => {
                return Err(NimbusError::ParsingFailed {
                    message: format!("volume specification {candidate:?} has invalid format"),
                })
            }
        };

        Ok(Self {
            name,
            storage_account,
            fileshare,
            target,
            read_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_volume_with_explicit_target() {
        let (volumes, mounts) =
            run_volumes(&["myuser1/myshare1:/my/path/to/target1".to_owned()]).unwrap();

        let volume = &volumes["volume-0"];
        assert_eq!(volume.driver, AZURE_FILE_DRIVER_NAME);
        assert_eq!(volume.driver_opts[DRIVER_OPT_ACCOUNT_NAME], "myuser1");
        assert_eq!(volume.driver_opts[DRIVER_OPT_SHARE_NAME], "myshare1");
        assert_eq!(volume.driver_opts[DRIVER_OPT_READ_ONLY], "false");

        assert_eq!(
            mounts,
            vec![ServiceVolumeConfig {
                mount_type: VolumeMountType::AzureFile,
                source: "volume-0".to_owned(),
                target: "/my/path/to/target1".to_owned(),
                read_only: false,
            }]
        );
    }

    #[test]
    fn run_volume_defaults_target_to_run_volumes() {
        let (_, mounts) = run_volumes(&["myuser2/myshare2".to_owned()]).unwrap();
        assert_eq!(mounts[0].target, "/run/volumes/myshare2");
        assert!(!mounts[0].read_only);
    }

    #[test]
    fn run_volume_read_only_permission() {
        let (volumes, mounts) = run_volumes(&["account/share:/target:ro".to_owned()]).unwrap();
        assert_eq!(volumes["volume-0"].driver_opts[DRIVER_OPT_READ_ONLY], "true");
        assert!(mounts[0].read_only);
    }

    #[test]
    fn run_volume_rejects_missing_account_or_share() {
        for bad in ["/share:/target", "account:/target", "account/:/target"] {
            assert!(run_volumes(&[bad.to_owned()]).is_err(), "{bad}");
        }
    }

    #[test]
    fn run_volume_rejects_invalid_mode_and_extra_tokens() {
        assert!(run_volumes(&["a/b:/t:rx".to_owned()]).is_err());
        assert!(run_volumes(&["a/b:/t:ro:extra".to_owned()]).is_err());
    }

    #[test]
    fn bind_mounts_are_rejected() {
        let service = ServiceConfig {
            name: "web".to_owned(),
            volumes: vec![ServiceVolumeConfig {
                mount_type: VolumeMountType::Bind,
                source: "/home/me/data".to_owned(),
                target: "/data".to_owned(),
                read_only: false,
            }],
            ..ServiceConfig::default()
        };
        let err = file_volume_mounts(&service).unwrap_err();
        assert!(err.to_string().contains("Azure File Share"));
    }
}
