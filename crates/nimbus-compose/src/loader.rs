//! YAML loading and normalization of Compose files.
//!
//! The raw serde model mirrors the on-disk schema (string-or-struct
//! shorthands, maps keyed by name); normalization flattens it into the
//! [`Project`](crate::types::Project) model consumed by backends.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use nimbus_common::error::{NimbusError, Result};

use crate::types::{
    DeployConfig, HealthCheckConfig, PortProtocol, Project, Resource, Resources,
    RestartPolicyCondition, RestartPolicyConfig, SecretConfig, ServiceConfig, ServicePortConfig,
    ServiceSecretConfig, ServiceVolumeConfig, VolumeConfig, VolumeMountType,
};

#[derive(Debug, Deserialize)]
struct RawComposeFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    services: BTreeMap<String, RawService>,
    #[serde(default)]
    volumes: BTreeMap<String, RawVolume>,
    #[serde(default)]
    secrets: BTreeMap<String, SecretConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    #[serde(default)]
    image: String,
    #[serde(default)]
    command: Option<StringOrList>,
    #[serde(default)]
    environment: Option<MappingOrList>,
    #[serde(default)]
    labels: Option<MappingOrList>,
    #[serde(default)]
    domainname: Option<String>,
    #[serde(default)]
    ports: Vec<RawPort>,
    #[serde(default)]
    volumes: Vec<RawServiceVolume>,
    #[serde(default)]
    secrets: Vec<RawServiceSecret>,
    #[serde(default)]
    deploy: Option<RawDeploy>,
    #[serde(default)]
    healthcheck: Option<RawHealthCheck>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVolume {
    #[serde(default)]
    driver: String,
    #[serde(default)]
    driver_opts: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => s.split_whitespace().map(str::to_owned).collect(),
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MappingOrList {
    Mapping(BTreeMap<String, Option<String>>),
    List(Vec<String>),
}

impl MappingOrList {
    fn into_mapping(self) -> BTreeMap<String, Option<String>> {
        match self {
            Self::Mapping(m) => m,
            Self::List(entries) => entries
                .into_iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_owned(), Some(v.to_owned())),
                    None => (entry, None),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Short(ShortPort),
    Long {
        target: u16,
        #[serde(default)]
        published: u16,
        #[serde(default)]
        protocol: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShortPort {
    Number(u16),
    Spec(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawServiceVolume {
    Short(String),
    Long {
        #[serde(rename = "type", default)]
        mount_type: Option<String>,
        source: String,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawServiceSecret {
    Short(String),
    Long {
        source: String,
        #[serde(default)]
        target: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct RawDeploy {
    #[serde(default)]
    restart_policy: Option<RawRestartPolicy>,
    #[serde(default)]
    resources: RawResources,
}

#[derive(Debug, Default, Deserialize)]
struct RawRestartPolicy {
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResources {
    #[serde(default)]
    limits: Option<RawResource>,
    #[serde(default)]
    reservations: Option<RawResource>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResource {
    #[serde(default)]
    cpus: Option<serde_yaml::Value>,
    #[serde(default)]
    memory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHealthCheck {
    #[serde(default)]
    test: Option<StringOrList>,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    start_period: Option<String>,
    #[serde(default)]
    retries: Option<u64>,
    #[serde(default)]
    disable: bool,
}

/// Loads a Compose project from a YAML file.
///
/// The project name defaults to the parent directory name when the file does
/// not declare one.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is malformed.
pub fn load_from_path(path: &Path) -> Result<Project> {
    let content = std::fs::read_to_string(path).map_err(|e| NimbusError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let fallback_name = path
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned())))
        .unwrap_or_else(|| "default".to_owned());
    load_from_str(&content, &fallback_name)
}

/// Loads a Compose project from YAML text.
///
/// # Errors
///
/// Returns `NimbusError::ParsingFailed` on malformed YAML or invalid
/// shorthand values.
pub fn load_from_str(content: &str, fallback_name: &str) -> Result<Project> {
    let raw: RawComposeFile =
        serde_yaml::from_str(content).map_err(|e| NimbusError::ParsingFailed {
            message: format!("invalid compose file: {e}"),
        })?;

    let name = raw.name.unwrap_or_else(|| fallback_name.to_owned());
    tracing::debug!(project = %name, services = raw.services.len(), "loaded compose file");

    let mut services = Vec::with_capacity(raw.services.len());
    for (service_name, raw_service) in raw.services {
        services.push(normalize_service(service_name, raw_service)?);
    }

    let volumes = raw
        .volumes
        .into_iter()
        .map(|(volume_name, v)| {
            let config = VolumeConfig {
                name: volume_name.clone(),
                driver: v.driver,
                driver_opts: v.driver_opts,
            };
            (volume_name, config)
        })
        .collect();

    Ok(Project {
        name,
        services,
        volumes,
        secrets: raw.secrets,
    })
}

fn normalize_service(name: String, raw: RawService) -> Result<ServiceConfig> {
    let mut ports = Vec::with_capacity(raw.ports.len());
    for port in raw.ports {
        ports.push(normalize_port(&name, port)?);
    }

    let volumes = raw
        .volumes
        .into_iter()
        .map(normalize_volume_mount)
        .collect::<Result<Vec<_>>>()?;

    let secrets = raw
        .secrets
        .into_iter()
        .map(|s| match s {
            RawServiceSecret::Short(source) => ServiceSecretConfig {
                source,
                target: String::new(),
            },
            RawServiceSecret::Long { source, target } => ServiceSecretConfig { source, target },
        })
        .collect();

    let labels = raw
        .labels
        .map(MappingOrList::into_mapping)
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect();

    Ok(ServiceConfig {
        name,
        image: raw.image,
        command: raw.command.map(StringOrList::into_vec),
        environment: raw
            .environment
            .map(MappingOrList::into_mapping)
            .unwrap_or_default(),
        labels,
        domainname: raw.domainname,
        ports,
        volumes,
        secrets,
        deploy: raw.deploy.map(normalize_deploy).transpose()?,
        healthcheck: raw.healthcheck.map(normalize_healthcheck).transpose()?,
    })
}

fn normalize_port(service: &str, raw: RawPort) -> Result<ServicePortConfig> {
    match raw {
        RawPort::Long {
            target,
            published,
            protocol,
        } => Ok(ServicePortConfig {
            target,
            published,
            protocol: parse_protocol(service, protocol.as_deref())?,
        }),
        RawPort::Short(ShortPort::Number(target)) => Ok(ServicePortConfig {
            target,
            published: 0,
            protocol: PortProtocol::Tcp,
        }),
        RawPort::Short(ShortPort::Spec(spec)) => parse_short_port(service, &spec),
    }
}

/// Parses the `[published:]target[/protocol]` short syntax.
///
/// # Errors
///
/// Returns a parsing error on malformed port numbers or an unknown
/// protocol.
pub fn parse_short_port(service: &str, spec: &str) -> Result<ServicePortConfig> {
    let malformed = |spec: &str| NimbusError::ParsingFailed {
        message: format!("service {service:?}: invalid port specification {spec:?}"),
    };
    let (ports, protocol) = match spec.split_once('/') {
        Some((ports, proto)) => (ports, Some(proto)),
        None => (spec, None),
    };
    let (published, target) = match ports.split_once(':') {
        Some((published, target)) => (
            published.parse::<u16>().map_err(|_| malformed(spec))?,
            target.parse::<u16>().map_err(|_| malformed(spec))?,
        ),
        None => (0, ports.parse::<u16>().map_err(|_| malformed(spec))?),
    };
    Ok(ServicePortConfig {
        target,
        published,
        protocol: parse_protocol(service, protocol)?,
    })
}

fn parse_protocol(service: &str, protocol: Option<&str>) -> Result<PortProtocol> {
    match protocol {
        None | Some("" | "tcp") => Ok(PortProtocol::Tcp),
        Some("udp") => Ok(PortProtocol::Udp),
        Some(other) => Err(NimbusError::ParsingFailed {
            message: format!("service {service:?}: unsupported port protocol {other:?}"),
        }),
    }
}

fn normalize_volume_mount(raw: RawServiceVolume) -> Result<ServiceVolumeConfig> {
    match raw {
        RawServiceVolume::Long {
            mount_type,
            source,
            target,
            read_only,
        } => Ok(ServiceVolumeConfig {
            mount_type: match mount_type.as_deref() {
                None | Some("volume") => VolumeMountType::Volume,
                Some("bind") => VolumeMountType::Bind,
                Some("azure_file") => VolumeMountType::AzureFile,
                Some(other) => {
                    return Err(NimbusError::ParsingFailed {
                        message: format!("unsupported volume mount type {other:?}"),
                    });
                }
            },
            source,
            target,
            read_only,
        }),
        RawServiceVolume::Short(spec) => parse_short_volume(&spec),
    }
}

/// Parses the `source:target[:ro|rw]` short syntax. A source starting with
/// `/`, `.`, or `~` is a bind mount.
fn parse_short_volume(spec: &str) -> Result<ServiceVolumeConfig> {
    let mut parts = spec.splitn(3, ':');
    let source = parts.next().unwrap_or_default().to_owned();
    let target = parts
        .next()
        .ok_or_else(|| NimbusError::ParsingFailed {
            message: format!("volume specification {spec:?} has no target"),
        })?
        .to_owned();
    let read_only = match parts.next() {
        None | Some("rw") => false,
        Some("ro") => true,
        Some(other) => {
            return Err(NimbusError::ParsingFailed {
                message: format!("volume specification {spec:?} has an invalid mode {other:?}"),
            });
        }
    };
    let mount_type = if source.starts_with(['/', '.', '~']) {
        VolumeMountType::Bind
    } else {
        VolumeMountType::Volume
    };
    Ok(ServiceVolumeConfig {
        mount_type,
        source,
        target,
        read_only,
    })
}

fn normalize_deploy(raw: RawDeploy) -> Result<DeployConfig> {
    let restart_policy = raw
        .restart_policy
        .map(|rp| {
            let condition = match rp.condition.as_deref() {
                None | Some("" | "any") => RestartPolicyCondition::Any,
                Some("none") => RestartPolicyCondition::None,
                Some("on-failure") => RestartPolicyCondition::OnFailure,
                Some(other) => {
                    return Err(NimbusError::ParsingFailed {
                        message: format!("unsupported restart policy condition {other:?}"),
                    });
                }
            };
            Ok(RestartPolicyConfig { condition })
        })
        .transpose()?;

    Ok(DeployConfig {
        restart_policy,
        resources: Resources {
            limits: raw.resources.limits.map(normalize_resource).transpose()?,
            reservations: raw
                .resources
                .reservations
                .map(normalize_resource)
                .transpose()?,
        },
    })
}

fn normalize_resource(raw: RawResource) -> Result<Resource> {
    let cpus = match raw.cpus {
        None => String::new(),
        Some(serde_yaml::Value::String(s)) => s,
        Some(serde_yaml::Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(NimbusError::ParsingFailed {
                message: format!("invalid cpus value {other:?}"),
            });
        }
    };
    let memory_bytes = match raw.memory.as_deref() {
        None | Some("") => 0,
        Some(quantity) => crate::types::parse_bytes(quantity)?,
    };
    Ok(Resource { cpus, memory_bytes })
}

fn normalize_healthcheck(raw: RawHealthCheck) -> Result<HealthCheckConfig> {
    let parse = |value: Option<String>| -> Result<Option<std::time::Duration>> {
        value
            .as_deref()
            .map(crate::types::parse_duration)
            .transpose()
    };
    Ok(HealthCheckConfig {
        test: raw.test.map(StringOrList::into_vec).unwrap_or_default(),
        interval: parse(raw.interval)?,
        timeout: parse(raw.timeout)?,
        start_period: parse(raw.start_period)?,
        retries: raw.retries,
        disable: raw.disable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: webstack
services:
  web:
    image: nginx:alpine
    domainname: mysite
    ports:
      - "80:80"
      - "8125:8125/udp"
    environment:
      - API_URL=http://api:3000
    deploy:
      restart_policy:
        condition: on-failure
      resources:
        limits:
          cpus: "0.5"
          memory: 512M
    healthcheck:
      test: ["CMD", "curl", "-f", "http://localhost"]
      interval: 30s
      retries: 3
  api:
    image: myregistry.azurecr.io/api:v2
    secrets:
      - api_key
    volumes:
      - data:/var/lib/data:ro
volumes:
  data:
    driver: azure_file
    driver_opts:
      share_name: myshare
      storage_account_name: myaccount
secrets:
  api_key:
    file: ./api_key.txt
"#;

    #[test]
    fn loads_project_name_and_services() {
        let project = load_from_str(SAMPLE, "fallback").expect("load");
        assert_eq!(project.name, "webstack");
        assert_eq!(project.services.len(), 2);
        // BTreeMap ordering: api before web.
        assert_eq!(project.services[0].name, "api");
        assert_eq!(project.services[1].name, "web");
    }

    #[test]
    fn falls_back_to_directory_name() {
        let project = load_from_str("services: {}", "mydir").expect("load");
        assert_eq!(project.name, "mydir");
    }

    #[test]
    fn parses_short_port_syntax() {
        let project = load_from_str(SAMPLE, "x").expect("load");
        let web = &project.services[1];
        assert_eq!(
            web.ports[0],
            ServicePortConfig {
                target: 80,
                published: 80,
                protocol: PortProtocol::Tcp,
            }
        );
        assert_eq!(web.ports[1].protocol, PortProtocol::Udp);
    }

    #[test]
    fn parses_environment_list_form() {
        let project = load_from_str(SAMPLE, "x").expect("load");
        let web = &project.services[1];
        assert_eq!(
            web.environment.get("API_URL"),
            Some(&Some("http://api:3000".to_owned()))
        );
    }

    #[test]
    fn parses_deploy_resources() {
        let project = load_from_str(SAMPLE, "x").expect("load");
        let deploy = project.services[1].deploy.as_ref().expect("deploy");
        let limits = deploy.resources.limits.as_ref().expect("limits");
        assert_eq!(limits.cpus, "0.5");
        assert_eq!(limits.memory_bytes, 512 * 1024 * 1024);
        assert_eq!(
            deploy.restart_policy.expect("policy").condition,
            RestartPolicyCondition::OnFailure
        );
    }

    #[test]
    fn parses_volume_declarations() {
        let project = load_from_str(SAMPLE, "x").expect("load");
        let data = project.volumes.get("data").expect("volume");
        assert_eq!(data.driver, "azure_file");
        assert_eq!(data.driver_opts.get("share_name").map(String::as_str), Some("myshare"));
        let api = &project.services[0];
        assert!(api.volumes[0].read_only);
    }

    #[test]
    fn parses_short_volume_bind_detection() {
        let mount = parse_short_volume("./local:/data").expect("parse");
        assert_eq!(mount.mount_type, VolumeMountType::Bind);
        let mount = parse_short_volume("named:/data").expect("parse");
        assert_eq!(mount.mount_type, VolumeMountType::Volume);
    }

    #[test]
    fn rejects_invalid_volume_mode() {
        assert!(parse_short_volume("named:/data:rx").is_err());
    }

    #[test]
    fn parses_healthcheck() {
        let project = load_from_str(SAMPLE, "x").expect("load");
        let hc = project.services[1].healthcheck.as_ref().expect("healthcheck");
        assert_eq!(hc.test[0], "CMD");
        assert_eq!(hc.interval, Some(std::time::Duration::from_secs(30)));
        assert_eq!(hc.retries, Some(3));
    }

    #[test]
    fn rejects_unpublished_garbage_port() {
        let yaml = "services:\n  web:\n    image: i\n    ports:\n      - \"eighty\"\n";
        assert!(load_from_str(yaml, "x").is_err());
    }

    #[test]
    fn load_from_path_defaults_name_to_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project_dir = dir.path().join("shop-backend");
        std::fs::create_dir(&project_dir).expect("mkdir");
        let file = project_dir.join("docker-compose.yml");
        std::fs::write(&file, "services:\n  web:\n    image: nginx\n").expect("write");

        let project = load_from_path(&file).expect("load");
        assert_eq!(project.name, "shop-backend");
    }

    #[test]
    fn load_from_path_reports_missing_file() {
        let err = load_from_path(Path::new("/nonexistent/docker-compose.yml")).unwrap_err();
        assert!(matches!(err, NimbusError::Io { .. }));
    }
}
