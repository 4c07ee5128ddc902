//! Integration tests for the spotdeploy CLI
//!
//! These tests spawn the actual binary and test end-to-end behavior.
//! Nothing here needs cloud credentials.

mod cli_tests;
mod config_errors;
