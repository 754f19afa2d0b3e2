//! Utility modules for process execution, retries, filesystem and logging.

pub mod command;
pub mod fs;
pub mod logging;
pub mod retry;
