//! `nimbus down` — remove a deployed Compose application.

use std::path::PathBuf;

use clap::Args;

use nimbus_aci::client::ContainerGroupsClient;

/// Arguments for the `down` command.
#[derive(Args, Debug)]
pub struct DownArgs {
    /// Project name of the application to remove.
    #[arg(short, long, conflicts_with = "file")]
    pub project_name: Option<String>,

    /// Compose file to take the project name from.
    #[arg(short, long, default_value = "docker-compose.yml")]
    pub file: PathBuf,
}

/// Executes the `down` command.
///
/// # Errors
///
/// Returns an error when the container group does not exist or deletion is
/// rejected.
pub async fn execute(args: DownArgs, context: Option<&str>) -> anyhow::Result<()> {
    let ctx = super::resolve_aci_context(context, "down")?;
    let login = super::login_service()?;

    let name = match args.project_name {
        Some(name) => name.to_lowercase(),
        None => nimbus_compose::load_from_path(&args.file)?.name.to_lowercase(),
    };

    let client = ContainerGroupsClient::new(&login, ctx);
    client.delete(&name).await?;
    println!("removed group {name}");
    Ok(())
}
