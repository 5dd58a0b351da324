//! `nimbus login` / `nimbus logout` — Azure credential management.

use clap::Args;

use nimbus_aci::login::cloud_environment::AZURE_PUBLIC_CLOUD_NAME;

/// Arguments for the `login` command.
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Azure AD tenant to sign in to; defaults to the first tenant the
    /// account can access.
    #[arg(long)]
    pub tenant_id: Option<String>,

    /// Sovereign cloud to sign in to.
    #[arg(long, default_value = AZURE_PUBLIC_CLOUD_NAME)]
    pub cloud_name: String,

    /// Service principal client ID; switches to non-interactive login.
    #[arg(long, requires = "client_secret", requires = "tenant_id")]
    pub client_id: Option<String>,

    /// Service principal client secret.
    #[arg(long, requires = "client_id")]
    pub client_secret: Option<String>,
}

/// Executes the `login` command.
///
/// # Errors
///
/// Returns an error when authentication fails or is canceled.
pub async fn execute(args: LoginArgs) -> anyhow::Result<()> {
    let service = super::login_service()?;
    match (&args.client_id, &args.client_secret, &args.tenant_id) {
        (Some(client_id), Some(client_secret), Some(tenant_id)) => {
            service
                .login_service_principal(client_id, client_secret, tenant_id, &args.cloud_name)
                .await?;
        }
        _ => {
            service
                .login(args.tenant_id.as_deref(), &args.cloud_name)
                .await?;
        }
    }
    println!("login succeeded");
    Ok(())
}

/// Executes the `logout` command.
///
/// # Errors
///
/// Returns an error when no credentials are stored.
pub async fn logout() -> anyhow::Result<()> {
    let service = super::login_service()?;
    service.logout()?;
    println!("logout succeeded");
    Ok(())
}
