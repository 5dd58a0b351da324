//! `nimbus ps` — list services deployed in the current context.

use clap::Args;

use nimbus_aci::client::ContainerGroupsClient;
use nimbus_aci::convert::{self, DNS_SIDECAR_NAME};
use nimbus_aci::models::ContainerGroup;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Only show services of one project.
    #[arg(short, long)]
    pub project_name: Option<String>,

    /// Print the raw JSON returned by Azure.
    #[arg(long)]
    pub json: bool,
}

/// Composite container ID; single-container groups keep the bare group name.
fn container_id(group: &ContainerGroup, container_name: &str) -> String {
    let real_containers = group
        .properties
        .containers
        .iter()
        .filter(|c| c.name != DNS_SIDECAR_NAME)
        .count();
    if real_containers == 1 {
        group.name.clone()
    } else {
        format!("{}_{container_name}", group.name)
    }
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error when the container groups cannot be listed.
pub async fn execute(args: PsArgs, context: Option<&str>) -> anyhow::Result<()> {
    let ctx = super::resolve_aci_context(context, "ps")?;
    let login = super::login_service()?;
    let region = ctx.location.clone();

    let client = ContainerGroupsClient::new(&login, ctx);
    let mut groups = client.list().await?;
    if let Some(project) = &args.project_name {
        let wanted = project.to_lowercase();
        groups.retain(|g| g.name == wanted);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    println!(
        "{:<30} {:<20} {:<10} {:<30}",
        "ID", "SERVICE", "REPLICAS", "PORTS"
    );
    for group in &groups {
        for container in &group.properties.containers {
            if container.name == DNS_SIDECAR_NAME {
                continue;
            }
            let status = convert::service_status(
                &container_id(group, &container.name),
                group,
                container,
                &region,
            );
            println!(
                "{:<30} {:<20} {:<10} {:<30}",
                status.id,
                status.name,
                output::replicas_cell(status.replicas, status.desired),
                output::ports_cell(&status.ports),
            );
        }
    }
    Ok(())
}
