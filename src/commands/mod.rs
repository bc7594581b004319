//! CLI commands implementation

pub mod init;
pub mod recover;
pub mod run;
pub mod status;

pub use init::*;
pub use recover::*;
pub use run::*;
pub use status::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::{ResourceStore, RunLease};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

/// Lease shared by every command that moves resource state
pub const PIPELINE_LEASE: &str = "pipeline";

/// Take the pipeline lease or fail with `Error::Locked`
pub(crate) async fn acquire_lease(config: &Config, store: &dyn ResourceStore) -> Result<RunLease> {
    let holder = format!("{}-{}", std::process::id(), Uuid::new_v4());
    let ttl = config.recovery.lock_ttl();
    let lease = store
        .try_acquire_lease(PIPELINE_LEASE, &holder, ttl, Utc::now())
        .await?
        .ok_or_else(|| Error::Locked(PIPELINE_LEASE.to_string()))?;
    debug!(holder = %lease.holder, expires_at = %lease.expires_at, "Lease acquired");
    Ok(lease)
}

/// Release the lease, keeping the command's own error if both fail
pub(crate) async fn release_lease<T>(
    store: &dyn ResourceStore,
    lease: &RunLease,
    result: Result<T>,
) -> Result<T> {
    let released = store.release_lease(lease).await;
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            tracing::warn!("Could not release lease: {}", release_err);
            Err(e)
        }
    }
}
