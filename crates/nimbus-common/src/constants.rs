//! Well-known names, paths, and environment variables.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Application name used in CLI output and store files.
pub const APP_NAME: &str = "nimbus";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "nimbus";

/// File name of the persisted Azure access token, relative to the config dir.
pub const TOKEN_STORE_FILENAME: &str = "nimbusAccessToken.json";

/// File name of the persisted context index, relative to the config dir.
pub const CONTEXT_STORE_FILENAME: &str = "contexts.json";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_VAR: &str = "NIMBUS_CONFIG_DIR";

/// Environment variable pointing at an alternative cloud metadata endpoint.
pub const CLOUD_METADATA_URL_VAR: &str = "NIMBUS_CLOUD_METADATA_URL";

/// Returns the config directory, preferring `$NIMBUS_CONFIG_DIR`, then
/// `<user config dir>/nimbus`, falling back to `~/.nimbus`.
fn resolve_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_VAR) {
        return PathBuf::from(dir);
    }
    if let Some(base) = dirs::config_dir() {
        return base.join(APP_NAME);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!(".{APP_NAME}"))
}

static CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved config directory for this session.
pub fn config_dir() -> &'static PathBuf {
    CONFIG_DIR.get_or_init(resolve_config_dir)
}

/// Returns the default token store path.
pub fn default_token_store_path() -> PathBuf {
    config_dir().join(TOKEN_STORE_FILENAME)
}

/// Returns the default context store path.
pub fn default_context_store_path() -> PathBuf {
    config_dir().join(CONTEXT_STORE_FILENAME)
}
