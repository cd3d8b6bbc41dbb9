//! Configuration module
//!
//! YAML configuration with per-section defaults, environment overrides and
//! validation. See `types` for the full schema.

pub mod types;
pub mod loader;
pub mod validation;

pub use types::*;
pub use loader::*;
pub use validation::*;

#[cfg(test)]
mod tests;

use crate::errors::AnalystError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<AnalystConfig, AnalystError> {
    ConfigLoader::from_file(path).await
}
