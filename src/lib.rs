//! Service password lifecycle across Pulumi stacks, Secret Manager and
//! Kubernetes.
//!
//! Generates passwords, records them in the stack configuration, publishes
//! them to Google Secret Manager, and declares ExternalSecrets so the
//! in-cluster controller materializes them as Kubernetes secrets.
//!
//! ## Modules
//! - `cli` — Command-line handlers
//! - `core` — Business logic (generator, stores, bridge, orchestration, audit)
//! - `models` — Data structures
//! - `util` — Process execution, retries, filesystem, logging

pub mod cli;
pub mod constants;
pub mod core;
pub mod error;
pub mod models;
pub mod util;

pub use error::{Error, Result};
