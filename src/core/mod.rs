//! Core business logic modules.

pub mod audit_log;
pub mod bridge;
pub mod comparator;
pub mod config_store;
pub mod file_lock;
pub mod generator;
pub mod orchestrator;
pub mod paths;
pub mod secret_manager;
pub mod settings;

#[cfg(test)]
pub(crate) mod fakes;
