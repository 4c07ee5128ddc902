//! Infrastructure layer - concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, the
//! cloud and container CLIs, filesystem stores and SSH host-key maintenance.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod azure;
pub mod classifier;
pub mod command_runner;
pub mod config;
pub mod docker;
pub mod fs;
pub mod jobs;
pub mod routes;
pub mod secrets;
pub mod ssh;
pub mod state;
