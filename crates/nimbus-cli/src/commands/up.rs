//! `nimbus up` — deploy a Compose application as one container group.

use std::path::PathBuf;

use clap::Args;

use nimbus_aci::client::ContainerGroupsClient;
use nimbus_aci::convert::registry::{resolve_registry_credentials, CliRegistryHelper};
use nimbus_aci::convert::{self, DNS_SIDECAR_NAME};
use nimbus_aci::login::storage::StorageAccountHelper;

/// Arguments for the `up` command.
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Path to the Compose file.
    #[arg(short, long, default_value = "docker-compose.yml")]
    pub file: PathBuf,

    /// Project name; defaults to the name in the file or its directory.
    #[arg(short, long)]
    pub project_name: Option<String>,
}

/// Executes the `up` command.
///
/// # Errors
///
/// Returns an error when the Compose file is invalid, conversion fails, or
/// the deployment is rejected by Azure.
pub async fn execute(args: UpArgs, context: Option<&str>) -> anyhow::Result<()> {
    let ctx = super::resolve_aci_context(context, "up")?;
    let login = super::login_service()?;

    let mut project = nimbus_compose::load_from_path(&args.file)?;
    if let Some(name) = args.project_name {
        project.name = name;
    }

    let credentials =
        resolve_registry_credentials(&project, &CliRegistryHelper, &login).await?;
    let storage = StorageAccountHelper::new(&login, ctx.clone());
    let group = convert::to_container_group(&ctx, &project, &storage, credentials).await?;

    tracing::debug!(group = %group.name, "deploying container group");
    println!("deploying group {} ...", group.name);
    let client = ContainerGroupsClient::new(&login, ctx);
    let deployed = client.create_or_update(&group).await?;

    for container in &deployed.properties.containers {
        if container.name != DNS_SIDECAR_NAME {
            println!("  {}  done", container.name);
        }
    }
    let fqdn = convert::group_fqdn(&deployed, &deployed.location);
    if !fqdn.is_empty() {
        println!("application available at http://{fqdn}");
    }
    Ok(())
}
