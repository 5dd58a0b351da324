//! `nimbus run` — run a single container as its own container group.

use std::collections::BTreeMap;

use clap::Args;

use nimbus_aci::client::ContainerGroupsClient;
use nimbus_aci::convert::registry::{resolve_registry_credentials, CliRegistryHelper};
use nimbus_aci::convert::{self, volumes};
use nimbus_aci::login::storage::StorageAccountHelper;
use nimbus_compose::types::{Project, ServiceConfig};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image to run.
    pub image: String,

    /// Container name; derived from the image when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Published ports, `[published:]target[/protocol]`.
    #[arg(short, long = "publish")]
    pub ports: Vec<String>,

    /// Azure File volumes, `storage-account/fileshare[:target][:ro|rw]`.
    #[arg(short, long = "volume")]
    pub volumes: Vec<String>,

    /// Environment variables, `KEY=value` or `KEY` to pass through.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// DNS label requested for the container group.
    #[arg(long)]
    pub domainname: Option<String>,
}

/// Derives a container-group-safe name from an image reference.
fn name_from_image(image: &str) -> String {
    let base = image
        .rsplit('/')
        .next()
        .unwrap_or(image)
        .split(':')
        .next()
        .unwrap_or(image);
    base.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .to_lowercase()
}

fn parse_env(specs: &[String]) -> BTreeMap<String, Option<String>> {
    specs
        .iter()
        .map(|spec| match spec.split_once('=') {
            Some((key, value)) => (key.to_owned(), Some(value.to_owned())),
            None => (spec.clone(), None),
        })
        .collect()
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error when a flag cannot be parsed or the deployment fails.
pub async fn execute(args: RunArgs, context: Option<&str>) -> anyhow::Result<()> {
    let ctx = super::resolve_aci_context(context, "run")?;
    let login = super::login_service()?;

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| name_from_image(&args.image));

    let (project_volumes, service_volumes) = volumes::run_volumes(&args.volumes)?;
    let ports = args
        .ports
        .iter()
        .map(|spec| nimbus_compose::loader::parse_short_port(&name, spec))
        .collect::<Result<Vec<_>, _>>()?;

    let project = Project {
        name: name.clone(),
        services: vec![ServiceConfig {
            name: name.clone(),
            image: args.image.clone(),
            environment: parse_env(&args.env),
            ports,
            volumes: service_volumes,
            domainname: args.domainname.clone(),
            ..ServiceConfig::default()
        }],
        volumes: project_volumes,
        secrets: BTreeMap::new(),
    };

    let credentials =
        resolve_registry_credentials(&project, &CliRegistryHelper, &login).await?;
    let storage = StorageAccountHelper::new(&login, ctx.clone());
    let group = convert::to_container_group(&ctx, &project, &storage, credentials).await?;

    let client = ContainerGroupsClient::new(&login, ctx);
    let deployed = client.create(&group).await?;
    println!("{}", deployed.name);
    let fqdn = convert::group_fqdn(&deployed, &deployed.location);
    if !fqdn.is_empty() {
        println!("container available at http://{fqdn}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_derived_from_the_image_base() {
        assert_eq!(name_from_image("nginx"), "nginx");
        assert_eq!(name_from_image("ghcr.io/org/app:1.2"), "app");
        assert_eq!(name_from_image("my_image"), "my-image");
    }

    #[test]
    fn env_specs_split_on_the_first_equals() {
        let env = parse_env(&["A=1".to_owned(), "B=x=y".to_owned(), "PASSTHROUGH".to_owned()]);
        assert_eq!(env["A"], Some("1".to_owned()));
        assert_eq!(env["B"], Some("x=y".to_owned()));
        assert_eq!(env["PASSTHROUGH"], None);
    }
}
