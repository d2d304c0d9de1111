//! Push protocol

use tracing::{debug, info, warn};

use super::{check_remote, retry_delay, RemoteTrackingState};
use crate::backend::{Backend, BackendCall, CallKind, MergeStrategy};
use crate::error::{classify, Classification, NotesError, NotesResult};
use crate::namespace::Namespace;
use crate::store::NotesStore;

/// How a single attempt ended, short of a hard error
enum Attempt {
    Pushed,
    Rejected,
}

impl<B: Backend> NotesStore<B> {
    /// Push `namespace` to `remote`, merging in concurrent remote changes
    ///
    /// Retries up to `push_attempts` times when another writer updates the
    /// remote ref between our fetch and our push.
    pub async fn push_notes(&self, namespace: &Namespace, remote: &str) -> NotesResult<()> {
        self.push_with_attempts(namespace, remote, self.config.push_attempts)
            .await
    }

    /// [`NotesStore::push_notes`] with an explicit attempt budget
    pub async fn push_with_attempts(
        &self,
        namespace: &Namespace,
        remote: &str,
        attempts: u32,
    ) -> NotesResult<()> {
        check_remote(remote)?;
        let attempts = attempts.max(1);
        let _guard = self.push_lock.lock().await;

        info!("Pushing {} to {}", namespace, remote);
        for attempt in 1..=attempts {
            match self.push_attempt(namespace, remote).await? {
                Attempt::Pushed => {
                    info!("Pushed {} to {} (attempt {})", namespace, remote, attempt);
                    return Ok(());
                }
                Attempt::Rejected if attempt < attempts => {
                    let delay = retry_delay(attempt, self.config.push_backoff());
                    warn!(
                        "Push of {} rejected by {}, retrying in {:?} ({}/{})",
                        namespace, remote, delay, attempt, attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Rejected => {}
            }
        }

        Err(NotesError::PushFailed {
            notes_ref: namespace.notes_ref(),
            remote: remote.to_string(),
            attempts,
        })
    }

    async fn push_attempt(&self, namespace: &Namespace, remote: &str) -> NotesResult<Attempt> {
        let notes_ref = namespace.notes_ref();
        let tracking_ref = namespace.tracking_ref(remote);

        self.abort_merge(&notes_ref).await;

        let state = self.track_remote(remote, &notes_ref, &tracking_ref).await?;
        debug!("Remote tracking state: {:?}", state);

        let merged = if state.should_merge() {
            self.merge_tracking(&notes_ref, &tracking_ref, &state).await?;
            true
        } else {
            false
        };

        if !merged && state.local_hash.is_none() {
            self.bootstrap(&notes_ref).await?;
        }

        let out = self
            .run(&BackendCall::PushRef {
                remote: remote.to_string(),
                notes_ref: notes_ref.clone(),
            })
            .await?;
        if out.is_success() {
            return Ok(Attempt::Pushed);
        }
        match classify(CallKind::PushRef, &out) {
            Classification::PushConflict => Ok(Attempt::Rejected),
            _ => Err(NotesError::unclassified(CallKind::PushRef, &out)),
        }
    }

    /// Fetch the remote's ref and record what exists on both sides
    async fn track_remote(
        &self,
        remote: &str,
        notes_ref: &str,
        tracking_ref: &str,
    ) -> NotesResult<RemoteTrackingState> {
        let out = self
            .run(&BackendCall::FetchRef {
                remote: remote.to_string(),
                source: notes_ref.to_string(),
                destination: tracking_ref.to_string(),
                force: true,
            })
            .await?;
        let remote_exists = if out.is_success() {
            true
        } else {
            match classify(CallKind::FetchRef, &out) {
                Classification::RemoteRefNotFound => {
                    debug!("{} does not have {} yet", remote, notes_ref);
                    false
                }
                _ => return Err(NotesError::unclassified(CallKind::FetchRef, &out)),
            }
        };

        let local_hash = self.ref_hash(notes_ref).await?;
        let tracking_resolves = remote_exists && self.ref_exists(tracking_ref).await?;

        Ok(RemoteTrackingState {
            local_hash,
            remote_exists,
            tracking_resolves,
        })
    }

    /// Merge the tracking copy in; on failure put the local ref back
    async fn merge_tracking(
        &self,
        notes_ref: &str,
        tracking_ref: &str,
        state: &RemoteTrackingState,
    ) -> NotesResult<()> {
        let out = self
            .run(&BackendCall::MergeRef {
                notes_ref: notes_ref.to_string(),
                strategy: MergeStrategy::CatSortUniq,
                source: tracking_ref.to_string(),
            })
            .await?;

        let classification = classify(CallKind::MergeRef, &out);
        if out.is_success() || classification == Classification::MergeAlreadyCurrent {
            return Ok(());
        }

        warn!("Merge of {} into {} failed, rolling back", tracking_ref, notes_ref);
        self.rollback(notes_ref, state.local_hash.as_deref()).await;

        match classification {
            Classification::MergeConflict => Err(NotesError::MergeConflict {
                notes_ref: notes_ref.to_string(),
                source_ref: tracking_ref.to_string(),
                details: out.combined().trim().to_string(),
            }),
            _ => Err(NotesError::unclassified(CallKind::MergeRef, &out)),
        }
    }

    /// Restore `notes_ref` to `snapshot`, deleting it if it did not exist
    ///
    /// Failures are logged; the merge error is what the caller needs to see.
    async fn rollback(&self, notes_ref: &str, snapshot: Option<&str>) {
        self.abort_merge(notes_ref).await;

        let call = match snapshot {
            Some(hash) => BackendCall::UpdateRef {
                name: notes_ref.to_string(),
                hash: hash.to_string(),
            },
            None => BackendCall::DeleteRef {
                name: notes_ref.to_string(),
            },
        };
        match self.run(&call).await {
            Ok(out) if out.is_success() => debug!("Rolled back {}", notes_ref),
            Ok(out) => warn!(
                "Rollback of {} failed: {}",
                notes_ref,
                NotesError::unclassified(call.kind(), &out)
            ),
            Err(e) => warn!("Rollback of {} failed: {}", notes_ref, e),
        }
    }

    /// Give a brand-new namespace an empty commit so there is something to push
    async fn bootstrap(&self, notes_ref: &str) -> NotesResult<()> {
        if self.ref_exists(notes_ref).await? {
            return Ok(());
        }
        info!("Initializing empty {}", notes_ref);
        let out = self
            .run(&BackendCall::InitializeEmptyRef {
                name: notes_ref.to_string(),
            })
            .await?;
        if out.is_success() {
            Ok(())
        } else {
            Err(NotesError::unclassified(CallKind::InitializeEmptyRef, &out))
        }
    }

    async fn abort_merge(&self, notes_ref: &str) {
        let call = BackendCall::AbortMerge {
            notes_ref: notes_ref.to_string(),
        };
        if let Err(e) = self.run(&call).await {
            debug!("Ignoring failed merge abort on {}: {}", notes_ref, e);
        }
    }

    async fn ref_exists(&self, name: &str) -> NotesResult<bool> {
        let out = self
            .run(&BackendCall::RefExists {
                name: name.to_string(),
            })
            .await?;
        match out.status {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(NotesError::unclassified(CallKind::RefExists, &out)),
        }
    }

    /// Current hash of `name`, or `None` if it does not exist
    async fn ref_hash(&self, name: &str) -> NotesResult<Option<String>> {
        if !self.ref_exists(name).await? {
            return Ok(None);
        }
        let out = self
            .run(&BackendCall::ResolveRevision {
                revision: name.to_string(),
            })
            .await?;
        if !out.is_success() {
            return Err(NotesError::unclassified(CallKind::ResolveRevision, &out));
        }
        match out.stdout.trim() {
            "" => Err(NotesError::UnexpectedOutput {
                operation: CallKind::ResolveRevision.name(),
                details: format!("empty hash for {}", name),
            }),
            hash => Ok(Some(hash.to_string())),
        }
    }
}
