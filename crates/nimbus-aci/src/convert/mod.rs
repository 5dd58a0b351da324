//! Compose project → ACI container group conversion.
//!
//! The transform is pure and synchronous apart from secret file reads and
//! storage key lookups; it either assembles a complete group or fails, no
//! partial application.

pub mod registry;
pub mod secrets;
pub mod volumes;

use std::collections::BTreeMap;

use nimbus_common::error::{NimbusError, Result};
use nimbus_compose::types::{
    HealthCheckConfig, PortProtocol, Project, Resource, RestartPolicyCondition, ServiceConfig,
};

use crate::context::AciContext;
use crate::login::storage::StorageLogin;
use crate::models::{
    Container, ContainerGroup, ContainerGroupProperties, ContainerGroupRestartPolicy,
    ContainerNetworkProtocol, ContainerPort, ContainerProperties, ContainerSummary,
    EnvironmentVariable, ExecAction, ImageRegistryCredential, IpAddress, LivenessProbe,
    OperatingSystemType, Port, PortSummary, ResourceQuantity, ResourceRequirements, ServiceStatus,
    VolumeMount,
};

/// ACI status name of a running container.
pub const STATUS_RUNNING: &str = "Running";

/// Name of the synthesized DNS sidecar container.
pub const DNS_SIDECAR_NAME: &str = "aci--dns--sidecar";

const DNS_SIDECAR_IMAGE: &str = "busybox:1.31.1";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Converts a Compose project into an ACI container group.
///
/// Registry credentials are resolved by the caller (see
/// [`registry::resolve_registry_credentials`]) so the conversion itself
/// stays independent of the login service.
///
/// # Errors
///
/// Returns a conversion error on unsupported port mappings, labels,
/// inconsistent restart policies or domain names, invalid volumes, and
/// secret mount collisions.
pub async fn to_container_group(
    ctx: &AciContext,
    project: &Project,
    storage: &dyn StorageLogin,
    registry_credentials: Vec<ImageRegistryCredential>,
) -> Result<ContainerGroup> {
    let group_name = project.name.to_lowercase();

    let mut all_volumes = volumes::file_volumes(project, storage).await?;
    all_volumes.extend(secrets::secret_volumes(project)?);
    let group_volumes = if all_volumes.is_empty() {
        None
    } else {
        Some(all_volumes)
    };

    let restart_policy = group_restart_policy(project)?;

    let mut containers = Vec::with_capacity(project.services.len());
    let mut group_ports = Vec::new();
    let mut dns_label: Option<String> = None;
    for service in &project.services {
        if !service.labels.is_empty() {
            return Err(NimbusError::conversion(
                "ACI integration does not support labels in compose applications",
            ));
        }

        let mut container = service_container(service)?;
        let (container_ports, service_group_ports, service_domain) = convert_ports(service)?;
        container.properties.ports = container_ports;
        group_ports.extend(service_group_ports);
        if let Some(domain) = service_domain {
            if let Some(existing) = &dns_label {
                if *existing != domain {
                    return Err(NimbusError::conversion(
                        "ACI integration does not support specifying different domain names on services in the same compose application",
                    ));
                }
            }
            dns_label = Some(domain);
        }
        containers.push(container);
    }

    // ACI rejects a public IP with no ports, so the DNS label is dropped
    // along with the address.
    let ip_address = if group_ports.is_empty() {
        None
    } else {
        Some(IpAddress {
            address_type: "Public".to_owned(),
            ports: group_ports,
            ip: None,
            dns_name_label: dns_label,
            fqdn: None,
        })
    };

    if containers.len() > 1 {
        containers.push(dns_sidecar(&containers));
    }

    Ok(ContainerGroup {
        name: group_name,
        location: ctx.location.clone(),
        properties: ContainerGroupProperties {
            os_type: OperatingSystemType::Linux,
            containers,
            volumes: group_volumes,
            image_registry_credentials: registry_credentials,
            restart_policy,
            ip_address,
            instance_view: None,
            provisioning_state: None,
        },
    })
}

/// Converts the published ports of one service, also extracting its
/// requested DNS label.
fn convert_ports(
    service: &ServiceConfig,
) -> Result<(Vec<ContainerPort>, Vec<Port>, Option<String>)> {
    let mut container_ports = Vec::with_capacity(service.ports.len());
    let mut group_ports = Vec::with_capacity(service.ports.len());
    for port in &service.ports {
        if port.published != 0 && port.published != port.target {
            return Err(NimbusError::conversion(format!(
                "port mapping is not supported with ACI, cannot map port {} to {} for container {}",
                port.published, port.target, service.name
            )));
        }
        let protocol = match port.protocol {
            PortProtocol::Tcp => ContainerNetworkProtocol::Tcp,
            PortProtocol::Udp => ContainerNetworkProtocol::Udp,
        };
        container_ports.push(ContainerPort {
            port: i32::from(port.target),
            protocol,
        });
        group_ports.push(Port {
            port: i32::from(port.target),
            protocol,
        });
    }
    let dns_label = service
        .domainname
        .clone()
        .filter(|domain| !domain.is_empty());
    Ok((container_ports, group_ports, dns_label))
}

/// Builds the container for one service, ports excluded.
fn service_container(service: &ServiceConfig) -> Result<Container> {
    let mut mounts = volumes::file_volume_mounts(service)?;
    mounts.extend(secrets::secret_volume_mounts(service)?);
    let volume_mounts: Option<Vec<VolumeMount>> = if mounts.is_empty() {
        None
    } else {
        Some(mounts)
    };

    Ok(Container {
        name: service.name.clone(),
        properties: ContainerProperties {
            image: service.image.clone(),
            command: service.command.clone(),
            ports: Vec::new(),
            environment_variables: environment_variables(&service.environment),
            resources: Some(service_resources(service)?),
            volume_mounts,
            liveness_probe: service
                .healthcheck
                .as_ref()
                .and_then(to_liveness_probe),
            instance_view: None,
        },
    })
}

/// Default of 1 GB of memory and 1 CPU when the deploy section is silent.
fn service_resources(service: &ServiceConfig) -> Result<ResourceRequirements> {
    let resources = service.deploy.as_ref().map(|d| &d.resources);
    let limits = resources.and_then(|r| r.limits.as_ref());
    let reservations = resources.and_then(|r| r.reservations.as_ref());

    let (limit_memory, limit_cpu) = resource_quantities(limits, &service.name)?;
    let (request_memory, request_cpu) = resource_quantities(reservations, &service.name)?;

    let request = ResourceQuantity {
        memory_in_gb: request_memory.or(limit_memory).unwrap_or(1.0),
        cpu: request_cpu.or(limit_cpu).unwrap_or(1.0),
    };
    let limit = ResourceQuantity {
        memory_in_gb: limit_memory.unwrap_or(request.memory_in_gb),
        cpu: limit_cpu.unwrap_or(request.cpu),
    };
    Ok(ResourceRequirements {
        requests: request,
        limits: Some(limit),
    })
}

fn resource_quantities(
    resource: Option<&Resource>,
    service_name: &str,
) -> Result<(Option<f64>, Option<f64>)> {
    let Some(resource) = resource else {
        return Ok((None, None));
    };
    let memory = if resource.memory_bytes == 0 {
        None
    } else {
        Some(bytes_to_gb(resource.memory_bytes))
    };
    let cpu = if resource.cpus.is_empty() {
        None
    } else {
        Some(
            resource
                .cpus
                .parse::<f64>()
                .map_err(|_| NimbusError::ParsingFailed {
                    message: format!(
                        "service {service_name:?}: invalid cpus value {:?}",
                        resource.cpus
                    ),
                })?,
        )
    };
    Ok((memory, cpu))
}

#[allow(clippy::cast_precision_loss)]
fn bytes_to_gb(bytes: u64) -> f64 {
    let gb = bytes as f64 / GIB;
    (gb * 100.0).round() / 100.0
}

/// Environment variables in sorted order; unset values are resolved from
/// the caller's environment.
fn environment_variables(
    environment: &BTreeMap<String, Option<String>>,
) -> Vec<EnvironmentVariable> {
    environment
        .iter()
        .map(|(name, value)| EnvironmentVariable {
            name: name.clone(),
            value: value
                .clone()
                .unwrap_or_else(|| std::env::var(name).unwrap_or_default()),
        })
        .collect()
}

/// Translates a Compose healthcheck into an ACI liveness probe.
///
/// Zero durations and a zero retry count are left unset rather than sent as
/// zeros, which ACI would reject.
fn to_liveness_probe(healthcheck: &HealthCheckConfig) -> Option<LivenessProbe> {
    if healthcheck.disable || healthcheck.test.is_empty() {
        return None;
    }
    let mut command = healthcheck.test.clone();
    if matches!(command[0].as_str(), "NONE" | "CMD" | "CMD-SHELL") {
        command.remove(0);
    }

    #[allow(clippy::cast_possible_truncation)]
    let seconds = |duration: Option<std::time::Duration>| -> Option<i32> {
        duration
            .filter(|d| !d.is_zero())
            .map(|d| d.as_secs() as i32)
    };

    Some(LivenessProbe {
        exec: Some(ExecAction { command }),
        period_seconds: seconds(healthcheck.interval),
        failure_threshold: healthcheck
            .retries
            .filter(|r| *r > 0)
            .map(|r| i32::try_from(r).unwrap_or(i32::MAX)),
        success_threshold: None,
        initial_delay_seconds: seconds(healthcheck.start_period),
        timeout_seconds: seconds(healthcheck.timeout),
    })
}

/// Aggregates the restart policy across all services; differing conditions
/// are an error since ACI applies one policy to the whole group.
fn group_restart_policy(project: &Project) -> Result<ContainerGroupRestartPolicy> {
    let mut aggregated: Option<ContainerGroupRestartPolicy> = None;
    for service in &project.services {
        let Some(condition) = service
            .deploy
            .as_ref()
            .and_then(|d| d.restart_policy.as_ref())
            .map(|rp| rp.condition)
        else {
            continue;
        };
        let policy = to_aci_restart_policy(condition);
        if let Some(existing) = aggregated {
            if existing != policy {
                return Err(NimbusError::conversion(
                    "ACI integration does not support specifying different restart policies on services in the same compose application",
                ));
            }
        }
        aggregated = Some(policy);
    }
    Ok(aggregated.unwrap_or_default())
}

/// Maps a Compose restart condition onto the ACI group policy.
#[must_use]
pub const fn to_aci_restart_policy(
    condition: RestartPolicyCondition,
) -> ContainerGroupRestartPolicy {
    match condition {
        RestartPolicyCondition::None => ContainerGroupRestartPolicy::Never,
        RestartPolicyCondition::Any => ContainerGroupRestartPolicy::Always,
        RestartPolicyCondition::OnFailure => ContainerGroupRestartPolicy::OnFailure,
    }
}

/// Maps an ACI group policy back onto the Compose restart condition.
#[must_use]
pub const fn to_compose_restart_policy(
    policy: ContainerGroupRestartPolicy,
) -> RestartPolicyCondition {
    match policy {
        ContainerGroupRestartPolicy::Never => RestartPolicyCondition::None,
        ContainerGroupRestartPolicy::Always => RestartPolicyCondition::Any,
        ContainerGroupRestartPolicy::OnFailure => RestartPolicyCondition::OnFailure,
    }
}

/// Builds the DNS sidecar appended to multi-service groups.
///
/// ACI container groups share a network namespace but have no built-in DNS
/// between containers; the sidecar patches `/etc/hosts` with one line per
/// real service, then sleeps so the group-level restart policy does not
/// cycle it.
fn dns_sidecar(containers: &[Container]) -> Container {
    let mut commands: Vec<String> = containers
        .iter()
        .map(|c| format!("echo 127.0.0.1 {} >> /etc/hosts", c.name))
        .collect();
    commands.push("sleep infinity".to_owned());
    let quantity = ResourceQuantity {
        memory_in_gb: 0.1,
        cpu: 0.01,
    };
    Container {
        name: DNS_SIDECAR_NAME.to_owned(),
        properties: ContainerProperties {
            image: DNS_SIDECAR_IMAGE.to_owned(),
            command: Some(vec!["sh".to_owned(), "-c".to_owned(), commands.join(";")]),
            ports: Vec::new(),
            environment_variables: Vec::new(),
            resources: Some(ResourceRequirements {
                requests: quantity,
                limits: Some(quantity),
            }),
            volume_mounts: None,
            liveness_probe: None,
            instance_view: None,
        },
    }
}

/// Returns the observed status of one container, falling back to the group
/// state and finally `Unknown`.
#[must_use]
pub fn group_status(group: &ContainerGroup, container: &Container) -> String {
    let mut status = "Unknown".to_owned();
    if let Some(state) = group
        .properties
        .instance_view
        .as_ref()
        .and_then(|v| v.state.as_deref())
    {
        status = format!("Node {state}");
    }
    if let Some(state) = container
        .properties
        .instance_view
        .as_ref()
        .and_then(|v| v.current_state.as_ref())
        .and_then(|s| s.state.clone())
    {
        status = state;
    }
    status
}

/// FQDN assigned to a group with a DNS label, empty otherwise.
#[must_use]
pub fn group_fqdn(group: &ContainerGroup, region: &str) -> String {
    group
        .properties
        .ip_address
        .as_ref()
        .and_then(|ip| ip.dns_name_label.as_deref())
        .filter(|label| !label.is_empty())
        .map(|label| format!("{label}.{region}.azurecontainer.io"))
        .unwrap_or_default()
}

/// Converts group-level IP information plus container ports into the
/// backend-neutral port summaries.
#[must_use]
pub fn to_port_summaries(
    ip_address: Option<&IpAddress>,
    ports: &[ContainerPort],
) -> Vec<PortSummary> {
    let host_ip = ip_address
        .and_then(|ip| ip.ip.clone())
        .unwrap_or_default();
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let as_port = |port: i32| port as u16;
    ports
        .iter()
        .map(|p| PortSummary {
            host_port: as_port(p.port),
            container_port: as_port(p.port),
            host_ip: host_ip.clone(),
            protocol: match p.protocol {
                ContainerNetworkProtocol::Tcp => "tcp".to_owned(),
                ContainerNetworkProtocol::Udp => "udp".to_owned(),
            },
        })
        .collect()
}

/// Composes a backend-neutral container summary from an ACI container.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn container_summary(
    container_id: &str,
    group: &ContainerGroup,
    container: &Container,
    region: &str,
) -> ContainerSummary {
    let limits = container
        .properties
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref());
    let memory_limit = limits.map_or(0, |l| (l.memory_in_gb * GIB) as u64);
    let cpu_limit = limits.map_or(0.0, |l| l.cpu);

    let command = container
        .properties
        .command
        .as_ref()
        .map(|c| c.join(" "))
        .unwrap_or_default();

    let env: BTreeMap<String, String> = container
        .properties
        .environment_variables
        .iter()
        .map(|v| (v.name.clone(), v.value.clone()))
        .collect();

    ContainerSummary {
        id: container_id.to_owned(),
        status: group_status(group, container),
        image: container.properties.image.clone(),
        command,
        cpu_limit,
        memory_limit,
        ports: to_port_summaries(
            group.properties.ip_address.as_ref(),
            &container.properties.ports,
        ),
        platform: match group.properties.os_type {
            OperatingSystemType::Linux => "Linux".to_owned(),
            OperatingSystemType::Windows => "Windows".to_owned(),
        },
        restart_policy: match to_compose_restart_policy(group.properties.restart_policy) {
            RestartPolicyCondition::None => "none".to_owned(),
            RestartPolicyCondition::Any => "any".to_owned(),
            RestartPolicyCondition::OnFailure => "on-failure".to_owned(),
        },
        fqdn: group_fqdn(group, region),
        env,
    }
}

/// Composes a `ps`-style service status from an ACI container.
#[must_use]
pub fn service_status(
    container_id: &str,
    group: &ContainerGroup,
    container: &Container,
    region: &str,
) -> ServiceStatus {
    let replicas = u32::from(group_status(group, container) == STATUS_RUNNING);
    let fqdn = group_fqdn(group, region);
    let ports = to_port_summaries(
        group.properties.ip_address.as_ref(),
        &container.properties.ports,
    )
    .into_iter()
    .map(|p| {
        let host = if fqdn.is_empty() {
            p.host_ip.clone()
        } else {
            fqdn.clone()
        };
        format!("{host}:{}->{}/{}", p.host_port, p.container_port, p.protocol)
    })
    .collect();
    ServiceStatus {
        id: container_id.to_owned(),
        name: container.name.clone(),
        ports,
        replicas,
        desired: 1,
    }
}
