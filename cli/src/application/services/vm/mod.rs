//! Application services for the workspace VM: provisioning primitives and
//! the allocate-or-reuse lifecycle built on top of them.
//!
//! Each module imports only from `crate::domain` and
//! `crate::application::ports`.

pub mod lifecycle;
pub mod provisioner;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::error::VmError;

/// Sleep for `duration` unless `cancel` fires first.
pub(crate) async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), VmError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(VmError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}
