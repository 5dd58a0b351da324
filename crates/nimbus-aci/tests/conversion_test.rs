//! End-to-end conversion tests: Compose YAML in, ACI container group out.
//!
//! The pipeline under test:
//! 1. Parse the Compose file
//! 2. Convert services, volumes, and secrets to the container group model
//! 3. Serialize to the ARM wire shape

#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use nimbus_aci::convert::{self, DNS_SIDECAR_NAME};
use nimbus_aci::login::storage::StorageLogin;
use nimbus_aci::AciContext;
use nimbus_common::error::Result;

struct FakeStorage;

#[async_trait]
impl StorageLogin for FakeStorage {
    async fn storage_account_key(&self, _account_name: &str) -> Result<String> {
        Ok("dG9wc2VjcmV0a2V5".to_owned())
    }
}

fn ctx() -> AciContext {
    AciContext {
        subscription_id: "subID".to_owned(),
        resource_group: "rg".to_owned(),
        location: "eastus".to_owned(),
    }
}

#[tokio::test]
async fn two_service_compose_file_becomes_a_sidecar_group() {
    let compose = r#"
services:
  web:
    image: nginx:alpine
    domainname: myapp
    ports:
      - "80:80"
  worker:
    image: org/worker
    deploy:
      restart_policy:
        condition: on-failure
      resources:
        limits:
          cpus: "0.5"
          memory: 512M
"#;
    let project = nimbus_compose::load_from_str(compose, "demo").expect("valid compose file");
    let group = convert::to_container_group(&ctx(), &project, &FakeStorage, Vec::new())
        .await
        .expect("conversion succeeds");

    assert_eq!(group.name, "demo");
    assert_eq!(group.location, "eastus");

    let containers = &group.properties.containers;
    assert_eq!(containers.len(), 3);
    assert_eq!(containers[0].name, "web");
    assert_eq!(containers[1].name, "worker");
    assert_eq!(containers[2].name, DNS_SIDECAR_NAME);

    let ip = group.properties.ip_address.as_ref().expect("public IP");
    assert_eq!(ip.ports.len(), 1);
    assert_eq!(ip.ports[0].port, 80);
    assert_eq!(ip.dns_name_label.as_deref(), Some("myapp"));

    let worker_limits = containers[1]
        .properties
        .resources
        .as_ref()
        .unwrap()
        .limits
        .as_ref()
        .unwrap();
    assert!((worker_limits.cpu - 0.5).abs() < f64::EPSILON);
    assert!((worker_limits.memory_in_gb - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn azure_file_volumes_get_storage_keys() {
    let compose = r#"
services:
  app:
    image: app:1
    volumes:
      - data:/var/lib/app
volumes:
  data:
    driver: azure_file
    driver_opts:
      share_name: myshare
      storage_account_name: myaccount
"#;
    let project = nimbus_compose::load_from_str(compose, "vols").unwrap();
    let group = convert::to_container_group(&ctx(), &project, &FakeStorage, Vec::new())
        .await
        .unwrap();

    let volumes = group.properties.volumes.as_ref().expect("volumes present");
    assert_eq!(volumes.len(), 1);
    let azure_file = volumes[0].azure_file.as_ref().unwrap();
    assert_eq!(azure_file.share_name, "myshare");
    assert_eq!(azure_file.storage_account_name, "myaccount");
    assert_eq!(azure_file.storage_account_key, "dG9wc2VjcmV0a2V5");

    let mounts = group.properties.containers[0]
        .properties
        .volume_mounts
        .as_ref()
        .unwrap();
    assert_eq!(mounts[0].name, "data");
    assert_eq!(mounts[0].mount_path, "/var/lib/app");
}

#[tokio::test]
async fn secrets_mount_read_only_under_run_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let secret_file = dir.path().join("db_password");
    std::fs::write(&secret_file, "hunter2").unwrap();

    let compose = format!(
        r#"
services:
  db:
    image: postgres:13
    secrets:
      - db_password
secrets:
  db_password:
    file: {}
"#,
        secret_file.display()
    );
    let project = nimbus_compose::load_from_str(&compose, "secrets").unwrap();
    let group = convert::to_container_group(&ctx(), &project, &FakeStorage, Vec::new())
        .await
        .unwrap();

    let volumes = group.properties.volumes.as_ref().unwrap();
    assert_eq!(volumes.len(), 1);
    let payloads = volumes[0].secret.as_ref().unwrap();
    assert_eq!(payloads["db_password"], "aHVudGVyMg==");

    let mounts = group.properties.containers[0]
        .properties
        .volume_mounts
        .as_ref()
        .unwrap();
    assert_eq!(mounts[0].mount_path, "/run/secrets");
    assert_eq!(mounts[0].read_only, Some(true));
}

#[tokio::test]
async fn converted_group_serializes_to_arm_camel_case() {
    let compose = r#"
services:
  web:
    image: nginx
    ports:
      - "443:443"
"#;
    let project = nimbus_compose::load_from_str(compose, "wire").unwrap();
    let group = convert::to_container_group(&ctx(), &project, &FakeStorage, Vec::new())
        .await
        .unwrap();

    let json = serde_json::to_value(&group).unwrap();
    assert_eq!(json["properties"]["osType"], "Linux");
    assert_eq!(json["properties"]["restartPolicy"], "Always");
    assert_eq!(json["properties"]["ipAddress"]["type"], "Public");
    assert_eq!(
        json["properties"]["containers"][0]["properties"]["image"],
        "nginx"
    );
}
