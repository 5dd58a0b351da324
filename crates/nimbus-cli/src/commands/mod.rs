//! CLI command definitions and dispatch.

pub mod context;
pub mod down;
pub mod login;
pub mod ps;
pub mod run;
pub mod up;

use clap::{Parser, Subcommand};

use nimbus_aci::login::cloud_environment::CloudEnvironmentService;
use nimbus_aci::login::AzureLoginService;
use nimbus_aci::AciContext;
use nimbus_common::context::{ContextKind, ContextStore};
use nimbus_common::error::NimbusError;

/// Nimbus — run Compose applications on Azure Container Instances.
#[derive(Parser, Debug)]
#[command(name = "nimbus", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Use a named context instead of the current one.
    #[arg(long, short = 'c', global = true)]
    pub context: Option<String>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authenticate against Azure.
    Login(login::LoginArgs),
    /// Remove the stored Azure credentials.
    Logout,
    /// Manage deployment contexts.
    Context(context::ContextArgs),
    /// Deploy a Compose application.
    Up(up::UpArgs),
    /// Remove a deployed Compose application.
    Down(down::DownArgs),
    /// List services deployed in the current context.
    Ps(ps::PsArgs),
    /// Run a single container.
    Run(run::RunArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Login(args) => login::execute(args).await,
        Command::Logout => login::logout().await,
        Command::Context(args) => context::execute(args),
        Command::Up(args) => up::execute(args, cli.context.as_deref()).await,
        Command::Down(args) => down::execute(args, cli.context.as_deref()).await,
        Command::Ps(args) => ps::execute(args, cli.context.as_deref()).await,
        Command::Run(args) => run::execute(args, cli.context.as_deref()).await,
    }
}

/// Opens the context store at its default location.
pub(crate) fn context_store() -> anyhow::Result<ContextStore> {
    Ok(ContextStore::open(
        nimbus_common::constants::default_context_store_path(),
    )?)
}

/// Resolves the ACI deployment target, either the named or the current
/// context. ECS contexts are recognized but their execution path is not
/// wired in.
pub(crate) fn resolve_aci_context(
    name: Option<&str>,
    operation: &'static str,
) -> anyhow::Result<AciContext> {
    let store = context_store()?;
    let entry = match name {
        Some(name) => store.get(name)?,
        None => store.current()?,
    };
    match entry.kind {
        ContextKind::Aci(data) => Ok(data),
        ContextKind::Ecs(_) => Err(NimbusError::NotImplemented { operation }.into()),
    }
}

/// Builds the login service backed by the default token store.
pub(crate) fn login_service() -> anyhow::Result<AzureLoginService> {
    Ok(AzureLoginService::new(CloudEnvironmentService::new())?)
}
