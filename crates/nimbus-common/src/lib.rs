//! # nimbus-common
//!
//! Shared error taxonomy, well-known constants, and the CLI context store
//! used across the entire Nimbus workspace.
//!
//! This crate is the leaf of the dependency graph — it depends on no other
//! internal crate and provides the foundational primitives that all other
//! crates build upon.

pub mod constants;
pub mod context;
pub mod error;
