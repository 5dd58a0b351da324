//! `nimbus context` — deployment context management.

use clap::{Args, Subcommand};

use nimbus_common::context::{AciContextData, ContextEntry, ContextKind, EcsContextData};

/// Arguments for the `context` command group.
#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Context operation.
    #[command(subcommand)]
    pub command: ContextCommand,
}

/// Context subcommands.
#[derive(Subcommand, Debug)]
pub enum ContextCommand {
    /// Register a new context and make it current.
    Create(CreateArgs),
    /// List known contexts.
    Ls,
    /// Select the current context.
    Use {
        /// Context name.
        name: String,
    },
    /// Remove a context.
    Rm {
        /// Context name.
        name: String,
    },
}

/// Arguments for `context create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Backend-specific target.
    #[command(subcommand)]
    pub target: CreateTarget,
}

/// Backends a context can point at.
#[derive(Subcommand, Debug)]
pub enum CreateTarget {
    /// Azure Container Instances target.
    Aci {
        /// Context name.
        name: String,
        /// Azure subscription ID.
        #[arg(long)]
        subscription_id: String,
        /// Resource group hosting the container groups.
        #[arg(long)]
        resource_group: String,
        /// Azure region.
        #[arg(long, default_value = "eastus")]
        location: String,
        /// Optional description shown in `context ls`.
        #[arg(long)]
        description: Option<String>,
    },
    /// AWS ECS target.
    Ecs {
        /// Context name.
        name: String,
        /// AWS profile name.
        #[arg(long, default_value = "default")]
        profile: String,
        /// AWS region.
        #[arg(long, default_value = "us-east-1")]
        region: String,
        /// Optional description shown in `context ls`.
        #[arg(long)]
        description: Option<String>,
    },
}

/// Executes a `context` subcommand.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the named context is
/// missing or duplicated.
pub fn execute(args: ContextArgs) -> anyhow::Result<()> {
    let store = super::context_store()?;
    match args.command {
        ContextCommand::Create(create) => {
            let entry = match create.target {
                CreateTarget::Aci {
                    name,
                    subscription_id,
                    resource_group,
                    location,
                    description,
                } => ContextEntry {
                    name,
                    description,
                    kind: ContextKind::Aci(AciContextData {
                        subscription_id,
                        resource_group,
                        location,
                    }),
                },
                CreateTarget::Ecs {
                    name,
                    profile,
                    region,
                    description,
                } => ContextEntry {
                    name,
                    description,
                    kind: ContextKind::Ecs(EcsContextData { profile, region }),
                },
            };
            let name = entry.name.clone();
            store.create(entry)?;
            println!("Successfully created context {name:?}");
        }
        ContextCommand::Ls => {
            let current = store.current().map(|c| c.name).unwrap_or_default();
            let contexts = store.list()?;
            println!("{:<20} {:<6} {:<30}", "NAME", "TYPE", "DESCRIPTION");
            for context in contexts {
                let marker = if context.name == current { " *" } else { "" };
                println!(
                    "{:<20} {:<6} {:<30}",
                    format!("{}{marker}", context.name),
                    context.kind.type_name(),
                    context.description.unwrap_or_default(),
                );
            }
        }
        ContextCommand::Use { name } => {
            store.set_current(&name)?;
            println!("Current context is now {name:?}");
        }
        ContextCommand::Rm { name } => {
            store.remove(&name)?;
            println!("Removed context {name:?}");
        }
    }
    Ok(())
}
