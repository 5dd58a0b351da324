//! # nimbus — Compose deployments on Azure Container Instances
//!
//! Single binary for logging in to Azure, managing deployment contexts, and
//! running Compose applications as ACI container groups.

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;

use nimbus_common::error::NimbusError;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("nimbus: {err:#}");
            let code = err
                .downcast_ref::<NimbusError>()
                .map_or(1, NimbusError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
