//! Shared foundations: error taxonomy and runtime configuration.

pub mod config;
pub mod errors;
