//! Data structures shared by the core and the CLI.

pub mod comparison;
pub mod external_secret;
pub mod password_config;
pub mod policy;
pub mod settings;
