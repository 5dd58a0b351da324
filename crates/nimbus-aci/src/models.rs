//! ARM wire models for the container instance API.
//!
//! Shapes follow the `Microsoft.ContainerInstance/containerGroups` REST
//! resource (camelCase properties, optional fields omitted from the
//! payload), plus the backend-neutral summary types returned to the CLI.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Restart policy applied to a whole container group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerGroupRestartPolicy {
    /// Containers are always restarted.
    #[default]
    Always,
    /// Containers are never restarted.
    Never,
    /// Containers are restarted on failure only.
    OnFailure,
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerNetworkProtocol {
    /// TCP.
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

/// Operating system of a container group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingSystemType {
    /// Linux (the only OS this backend deploys).
    #[default]
    Linux,
    /// Windows.
    Windows,
}

/// An exposed port at the container group level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Port number.
    pub port: i32,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: ContainerNetworkProtocol,
}

/// An exposed port at the container level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port number.
    pub port: i32,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: ContainerNetworkProtocol,
}

/// Public IP configuration of a container group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddress {
    /// Address type; this backend only creates `Public` addresses.
    #[serde(rename = "type")]
    pub address_type: String,
    /// Exposed ports.
    pub ports: Vec<Port>,
    /// Allocated IP, populated by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Requested DNS name label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name_label: Option<String>,
    /// Fully qualified domain name, populated by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

/// An environment variable of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentVariable {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// CPU/memory quantity pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantity {
    /// Memory in gigabytes.
    pub memory_in_gb: f64,
    /// CPU count.
    pub cpu: f64,
}

/// Resource requests and limits of a container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Scheduling requests.
    pub requests: ResourceQuantity,
    /// Hard limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantity>,
}

/// A volume mount inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Name of the group-level volume.
    pub name: String,
    /// Absolute mount path.
    pub mount_path: String,
    /// Whether the mount is read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

/// Azure File share backing a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureFileVolume {
    /// File share name.
    pub share_name: String,
    /// Storage account name.
    pub storage_account_name: String,
    /// Storage account key.
    pub storage_account_key: String,
    /// Whether the share is mounted read-only.
    pub read_only: bool,
}

/// A group-level volume: either an Azure File share or an inline secret set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name referenced by mounts.
    pub name: String,
    /// Azure File backing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_file: Option<AzureFileVolume>,
    /// Base64-encoded secret payloads keyed by file name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<BTreeMap<String, String>>,
}

/// Exec action of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecAction {
    /// Probe command, exec form.
    pub command: Vec<String>,
}

/// Liveness probe of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessProbe {
    /// Command to execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecAction>,
    /// Seconds between probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    /// Failures before the container is restarted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
    /// Successes before the probe is considered passing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
    /// Grace period before the first probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    /// Probe timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
}

/// Last observed state of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// State name, e.g. `Running` or `Terminated`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Instance view of a container, populated by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInstanceView {
    /// Current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<ContainerState>,
    /// Restart count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i32>,
}

/// Properties of a single container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    /// Image reference.
    pub image: String,
    /// Override command, exec form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Exposed ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
    /// Resource requests and limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,
    /// Liveness probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<LivenessProbe>,
    /// Instance view, populated by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_view: Option<ContainerInstanceView>,
}

/// One container of a container group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Container properties.
    pub properties: ContainerProperties,
}

/// Registry credential attached to a container group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegistryCredential {
    /// Registry host.
    pub server: String,
    /// User name.
    pub username: String,
    /// Password or identity token.
    pub password: String,
}

/// Instance view of a container group, populated by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroupInstanceView {
    /// Group state, e.g. `Started` or `Stopped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Properties of a container group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroupProperties {
    /// Operating system type.
    pub os_type: OperatingSystemType,
    /// Containers of the group.
    pub containers: Vec<Container>,
    /// Group-level volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
    /// Registry credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_registry_credentials: Vec<ImageRegistryCredential>,
    /// Restart policy.
    pub restart_policy: ContainerGroupRestartPolicy,
    /// Public IP configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddress>,
    /// Instance view, populated by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_view: Option<ContainerGroupInstanceView>,
    /// Provisioning state, populated by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// A container group: the ACI unit of deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroup {
    /// Group name.
    pub name: String,
    /// Azure region.
    pub location: String,
    /// Group properties.
    pub properties: ContainerGroupProperties,
}

/// Backend-neutral published-port description shown by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSummary {
    /// Host-side port.
    pub host_port: u16,
    /// Container-side port.
    pub container_port: u16,
    /// Host IP the port is bound to, if known.
    pub host_ip: String,
    /// Transport protocol, lowercase.
    pub protocol: String,
}

/// Backend-neutral container description shown by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: String,
    /// Observed status.
    pub status: String,
    /// Image reference.
    pub image: String,
    /// Command line, joined.
    pub command: String,
    /// CPU limit.
    pub cpu_limit: f64,
    /// Memory limit in bytes.
    pub memory_limit: u64,
    /// Published ports.
    pub ports: Vec<PortSummary>,
    /// Platform (OS) name.
    pub platform: String,
    /// Restart policy condition, Compose vocabulary.
    pub restart_policy: String,
    /// Fully qualified domain name, when a DNS label was requested.
    pub fqdn: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
}

/// Backend-neutral service status shown by `ps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Container ID.
    pub id: String,
    /// Service name.
    pub name: String,
    /// Formatted port strings.
    pub ports: Vec<String>,
    /// Running replica count.
    pub replicas: u32,
    /// Desired replica count.
    pub desired: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_group_serializes_to_arm_shape() {
        let group = ContainerGroup {
            name: "demo".to_owned(),
            location: "eastus".to_owned(),
            properties: ContainerGroupProperties {
                os_type: OperatingSystemType::Linux,
                containers: vec![Container {
                    name: "web".to_owned(),
                    properties: ContainerProperties {
                        image: "nginx".to_owned(),
                        ports: vec![ContainerPort {
                            port: 80,
                            protocol: ContainerNetworkProtocol::Tcp,
                        }],
                        ..ContainerProperties::default()
                    },
                }],
                restart_policy: ContainerGroupRestartPolicy::OnFailure,
                ip_address: Some(IpAddress {
                    address_type: "Public".to_owned(),
                    ports: vec![Port {
                        port: 80,
                        protocol: ContainerNetworkProtocol::Tcp,
                    }],
                    ip: None,
                    dns_name_label: Some("demo".to_owned()),
                    fqdn: None,
                }),
                ..ContainerGroupProperties::default()
            },
        };
        let json = serde_json::to_value(&group).expect("serialize");
        assert_eq!(json["properties"]["osType"], "Linux");
        assert_eq!(json["properties"]["restartPolicy"], "OnFailure");
        assert_eq!(json["properties"]["ipAddress"]["type"], "Public");
        assert_eq!(json["properties"]["ipAddress"]["ports"][0]["protocol"], "TCP");
        assert_eq!(json["properties"]["ipAddress"]["dnsNameLabel"], "demo");
        assert_eq!(json["properties"]["containers"][0]["properties"]["image"], "nginx");
    }

    #[test]
    fn untouched_optional_fields_are_omitted() {
        let group = ContainerGroup::default();
        let json = serde_json::to_value(&group).expect("serialize");
        assert!(json["properties"].get("ipAddress").is_none());
        assert!(json["properties"].get("volumes").is_none());
        assert!(json["properties"].get("imageRegistryCredentials").is_none());
    }

    #[test]
    fn instance_view_round_trips() {
        let payload = r#"{
            "name": "demo",
            "location": "eastus",
            "properties": {
                "osType": "Linux",
                "containers": [],
                "restartPolicy": "Always",
                "instanceView": {"state": "Started"}
            }
        }"#;
        let group: ContainerGroup = serde_json::from_str(payload).expect("parse");
        assert_eq!(
            group.properties.instance_view.and_then(|v| v.state).as_deref(),
            Some("Started")
        );
    }
}
