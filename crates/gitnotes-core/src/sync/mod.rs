//! Notes synchronization with a remote
//!
//! Notes refs are shared by everyone who pushes to the remote, and nothing
//! locks them. Pushing is therefore optimistic:
//!
//! 1. Abort any notes merge left over from an interrupted run
//! 2. Fetch the remote's ref into the remote-tracking copy
//! 3. Merge that copy into the local ref (`cat_sort_uniq`)
//! 4. Push; if another writer got there first, wait and start over
//!
//! A failed merge is rolled back to the ref as it was before the attempt
//! and reported rather than retried.
//!
//! ## Usage
//!
//! ```ignore
//! store.fetch_notes(&ns, "origin").await?;
//! store.set(&ns, "HEAD", "reviewed").await?;
//! store.push_notes(&ns, "origin").await?;
//! ```

mod fetch;
mod push;

use std::time::Duration;

use crate::error::{NotesError, NotesResult};

pub use fetch::FetchOutcome;

/// What one push attempt learned about the refs before merging
///
/// Lives only as long as the attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTrackingState {
    /// Local notes ref before the merge, if it existed
    pub local_hash: Option<String>,
    /// The remote has the notes ref at all
    pub remote_exists: bool,
    /// The remote-tracking copy resolves locally
    pub tracking_resolves: bool,
}

impl RemoteTrackingState {
    /// Whether there is anything to merge
    pub fn should_merge(&self) -> bool {
        self.remote_exists && self.tracking_resolves
    }
}

/// Delay before retrying after `attempt` (1-based) was rejected
///
/// Grows quadratically: `base`, `4 * base`, `9 * base`, ...
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt.saturating_mul(attempt))
}

/// Reject remote names git would read as an option
fn check_remote(remote: &str) -> NotesResult<()> {
    if remote.is_empty() || remote.starts_with('-') || remote.contains('\0') {
        return Err(NotesError::InvalidRemote {
            remote: remote.to_string(),
        });
    }
    Ok(())
}
