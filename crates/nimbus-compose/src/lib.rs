//! # nimbus-compose
//!
//! Compose-file project model and loader.
//!
//! Handles:
//! - **Types**: the in-memory project model (services, volumes, secrets)
//!   that backends convert from.
//! - **Loader**: YAML parsing and normalization of the short-hand syntaxes
//!   (port strings, volume strings, environment lists).
//!
//! The model is immutable input to conversion; backends never mutate it
//! beyond local copies.

pub mod loader;
pub mod types;

pub use loader::{load_from_path, load_from_str};
pub use types::Project;
