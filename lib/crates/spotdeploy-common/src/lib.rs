pub mod config;
pub mod types;

pub use config::{ConfigError, OrchestratorConfig};
pub use types::*;
