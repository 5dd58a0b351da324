//! # nimbus-aci
//!
//! Azure Container Instances backend.
//!
//! Handles:
//! - **Convert**: Compose project → ACI container group (ports, restart
//!   policy, volumes, secrets, registry credentials, DNS sidecar).
//! - **Login**: Azure AD browser/device-code login, token persistence and
//!   refresh, sovereign cloud environment metadata.
//! - **Client**: thin ARM REST client for container group CRUD.
//!
//! Conversion is a pure, synchronous transform with early-return error
//! propagation; the only external effects are secret file reads, storage key
//! lookups, and registry auto-login.

pub mod client;
pub mod context;
pub mod convert;
pub mod login;
pub mod models;

pub use context::AciContext;
