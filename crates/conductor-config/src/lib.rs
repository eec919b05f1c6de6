//! # Conductor Config
//!
//! Layered engine configuration: TOML files, then `CONDUCTOR_`-prefixed
//! environment variables, validated as a whole before use.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
