//! In-memory Compose project model.
//!
//! Field coverage follows what the deployment backends consume; Compose
//! schema sections with no backend mapping are not modeled.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use nimbus_common::error::{NimbusError, Result};

/// A Compose project: named services plus shared volume and secret
/// declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project name, used as the deployment unit name.
    pub name: String,
    /// Services in declaration order.
    pub services: Vec<ServiceConfig>,
    /// Named volume declarations.
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeConfig>,
    /// Named secret declarations.
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretConfig>,
}

/// One service of a Compose project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (the key in the `services` map).
    pub name: String,
    /// Image reference.
    #[serde(default)]
    pub image: String,
    /// Override command, exec form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Environment variables; `None` values are resolved from the caller's
    /// environment at conversion time.
    #[serde(default)]
    pub environment: BTreeMap<String, Option<String>>,
    /// Service labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Optional DNS label requested for the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domainname: Option<String>,
    /// Published ports.
    #[serde(default)]
    pub ports: Vec<ServicePortConfig>,
    /// Volume mounts.
    #[serde(default)]
    pub volumes: Vec<ServiceVolumeConfig>,
    /// Secret mounts.
    #[serde(default)]
    pub secrets: Vec<ServiceSecretConfig>,
    /// Deployment configuration (restart policy, resources).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployConfig>,
    /// Container health check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheckConfig>,
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    /// TCP (the Compose default).
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

/// A single published port of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePortConfig {
    /// Container-side port.
    pub target: u16,
    /// Host-side port; `0` means unpublished.
    #[serde(default)]
    pub published: u16,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: PortProtocol,
}

/// Kind of a service volume mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeMountType {
    /// Reference to a named volume declaration.
    #[default]
    Volume,
    /// Host path bind mount.
    Bind,
    /// Azure File share reference created by `run`-style volume flags.
    AzureFile,
}

/// A volume mount of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVolumeConfig {
    /// Mount kind.
    #[serde(rename = "type", default)]
    pub mount_type: VolumeMountType,
    /// Named volume or host path.
    pub source: String,
    /// Absolute mount path inside the container.
    pub target: String,
    /// Whether the mount is read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// A named volume declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Volume driver, e.g. `azure_file`.
    #[serde(default)]
    pub driver: String,
    /// Driver-specific options.
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
}

/// A named secret declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Path of the file holding the secret payload, or an `inline:`-prefixed
    /// literal.
    pub file: String,
}

/// A secret mount of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSecretConfig {
    /// Name of the secret declaration.
    pub source: String,
    /// Mount target; defaults to the source name under `/run/secrets`.
    #[serde(default)]
    pub target: String,
}

/// Restart policy condition of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyCondition {
    /// Never restart.
    None,
    /// Always restart (the default).
    #[default]
    Any,
    /// Restart on non-zero exit only.
    OnFailure,
}

/// Restart policy block of a deploy section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicyConfig {
    /// Restart condition.
    #[serde(default)]
    pub condition: RestartPolicyCondition,
}

/// Resource quantities of a deploy section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// CPU count as a decimal string, e.g. `"0.5"`.
    #[serde(default)]
    pub cpus: String,
    /// Memory in bytes.
    #[serde(default)]
    pub memory_bytes: u64,
}

/// Limits and reservations of a deploy section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Hard limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Resource>,
    /// Scheduling reservations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservations: Option<Resource>,
}

/// Deploy section of a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Restart policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicyConfig>,
    /// Resource limits and reservations.
    #[serde(default)]
    pub resources: Resources,
}

/// Health check section of a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Probe command; may start with a `CMD`, `CMD-SHELL`, or `NONE` marker.
    #[serde(default)]
    pub test: Vec<String>,
    /// Interval between probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    /// Probe timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Grace period before the first probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<Duration>,
    /// Consecutive failures before the container is considered unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u64>,
    /// Whether the health check is disabled.
    #[serde(default)]
    pub disable: bool,
}

/// Parses a Compose byte quantity such as `512`, `64M`, or `2gb`.
///
/// # Errors
///
/// Returns `NimbusError::ParsingFailed` on an unrecognized suffix or a
/// non-numeric value.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn parse_bytes(input: &str) -> Result<u64> {
    let trimmed = input.trim().to_ascii_lowercase();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let value: f64 = number.parse().map_err(|_| NimbusError::ParsingFailed {
        message: format!("invalid byte quantity {input:?}"),
    })?;
    let multiplier: u64 = match suffix {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => {
            return Err(NimbusError::ParsingFailed {
                message: format!("invalid byte suffix in {input:?}"),
            });
        }
    };
    Ok((value * multiplier as f64) as u64)
}

/// Parses a Compose duration such as `10s`, `1m30s`, or `500ms`.
///
/// # Errors
///
/// Returns `NimbusError::ParsingFailed` on an unrecognized unit or a
/// malformed value.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut unit = String::new();
    let malformed = || NimbusError::ParsingFailed {
        message: format!("invalid duration {input:?}"),
    };

    let flush = |number: &mut String, unit: &mut String| -> Result<Duration> {
        let value: u64 = number.parse().map_err(|_| malformed())?;
        let d = match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(malformed()),
        };
        number.clear();
        unit.clear();
        Ok(d)
    };

    for c in input.trim().chars() {
        if c.is_ascii_digit() {
            if !unit.is_empty() {
                total += flush(&mut number, &mut unit)?;
            }
            number.push(c);
        } else {
            if number.is_empty() {
                return Err(malformed());
            }
            unit.push(c);
        }
    }
    if !number.is_empty() {
        total += flush(&mut number, &mut unit)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bytes_accepts_plain_numbers() {
        assert_eq!(parse_bytes("512").expect("parse"), 512);
    }

    #[test]
    fn parse_bytes_accepts_suffixes() {
        assert_eq!(parse_bytes("64M").expect("parse"), 64 * 1024 * 1024);
        assert_eq!(parse_bytes("2gb").expect("parse"), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_bytes("1.5k").expect("parse"), 1536);
    }

    #[test]
    fn parse_bytes_rejects_unknown_suffix() {
        assert!(parse_bytes("10q").is_err());
    }

    #[test]
    fn parse_duration_accepts_compound_values() {
        assert_eq!(
            parse_duration("1m30s").expect("parse"),
            Duration::from_secs(90)
        );
        assert_eq!(
            parse_duration("500ms").expect("parse"),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn parse_duration_rejects_bare_units() {
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn restart_policy_condition_uses_kebab_case() {
        let parsed: RestartPolicyCondition =
            serde_json::from_str("\"on-failure\"").expect("parse");
        assert_eq!(parsed, RestartPolicyCondition::OnFailure);
    }
}
