//! The three phases of a project cycle, run strictly in order:
//! `cleanup -> review -> work`.
//!
//! Phases share the policy that per-task failures are logged and
//! skipped, store unavailability aborts the cycle, and gateway
//! unavailability skips the spawning phases but never cleanup.

pub mod cleanup;
pub mod review;
pub mod work;

use trap_db::store::{StoreError, StoreResult};
use uuid::Uuid;

/// Swallow a per-task store failure, keeping only `Unavailable` fatal.
pub(crate) fn skip_non_fatal(
    result: StoreResult<()>,
    task_id: Uuid,
    action: &str,
) -> StoreResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e @ StoreError::Unavailable(_)) => Err(e),
        Err(e) => {
            tracing::warn!(task_id = %task_id, action, error = %e, "skipping task after store refusal");
            Ok(())
        }
    }
}

/// Whether an error chain bottoms out in a store-unavailable condition;
/// the cycle driver aborts the remaining phases when it does.
pub fn is_store_unavailable(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::Unavailable(_))))
}
