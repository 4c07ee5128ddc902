//! Domain layer - pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, or `std::process`.
//! All functions are synchronous and take data in, returning data out.

pub mod bootstrap;
pub mod compose;
pub mod error;
pub mod identity;
pub mod network;
pub mod routing;

#[allow(unused_imports)]
pub use error::{ContextError, DeployError, FailureClass, VmError};
#[allow(unused_imports)]
pub use identity::WorkspaceIdentity;
