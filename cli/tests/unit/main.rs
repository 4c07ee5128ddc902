//! Unit tests for spotdeploy
//!
//! These tests drive the library through its public API. Filesystem
//! adapters point at temp directories; nothing touches the cloud.

mod address_properties;
mod config_loading;
mod job_log;
mod route_publishing;
mod workspace_locks;
