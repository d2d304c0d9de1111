//! Fetching notes from a remote

use serde::Serialize;
use tracing::{debug, info, warn};

use super::check_remote;
use crate::backend::{Backend, BackendCall, CallKind};
use crate::error::{classify, Classification, NotesError, NotesResult};
use crate::namespace::Namespace;
use crate::store::NotesStore;

/// What [`NotesStore::fetch_notes`] found on the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    /// The local ref now matches the remote's
    Updated,
    /// The remote has no notes in this namespace; nothing changed
    NoRemoteNotes,
}

impl<B: Backend> NotesStore<B> {
    /// Replace the local notes ref with the remote's copy
    ///
    /// This overwrites local notes that were never pushed; use
    /// [`NotesStore::push_notes`] to combine both sides instead. After the
    /// ref is fetched, the annotated commits are fetched as well so the
    /// notes can be listed with timestamps. That second step is best effort.
    pub async fn fetch_notes(
        &self,
        namespace: &Namespace,
        remote: &str,
    ) -> NotesResult<FetchOutcome> {
        check_remote(remote)?;
        let notes_ref = namespace.notes_ref();
        info!("Fetching {} from {}", notes_ref, remote);

        let out = self
            .run(&BackendCall::FetchRef {
                remote: remote.to_string(),
                source: notes_ref.clone(),
                destination: notes_ref.clone(),
                force: true,
            })
            .await?;
        if !out.is_success() {
            return match classify(CallKind::FetchRef, &out) {
                Classification::RemoteRefNotFound => {
                    info!("{} has no {}", remote, notes_ref);
                    Ok(FetchOutcome::NoRemoteNotes)
                }
                _ => Err(NotesError::unclassified(CallKind::FetchRef, &out)),
            };
        }

        self.fetch_annotated_commits(&notes_ref, remote).await;
        Ok(FetchOutcome::Updated)
    }

    async fn fetch_annotated_commits(&self, notes_ref: &str, remote: &str) {
        let listing = match self
            .run(&BackendCall::ListNoteKeys {
                notes_ref: notes_ref.to_string(),
            })
            .await
        {
            Ok(out) if out.is_success() => out.stdout,
            Ok(out) => {
                warn!(
                    "Could not list fetched notes: {}",
                    NotesError::unclassified(CallKind::ListNoteKeys, &out)
                );
                return;
            }
            Err(e) => {
                warn!("Could not list fetched notes: {}", e);
                return;
            }
        };

        let commits: Vec<String> = listing
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(str::to_string)
            .collect();
        if commits.is_empty() {
            return;
        }

        debug!("Fetching {} annotated commits from {}", commits.len(), remote);
        let call = BackendCall::FetchObjects {
            remote: remote.to_string(),
            commits,
        };
        match self.run(&call).await {
            Ok(out) if out.is_success() => {}
            Ok(out) => warn!(
                "Could not fetch annotated commits: {}",
                NotesError::unclassified(CallKind::FetchObjects, &out)
            ),
            Err(e) => warn!("Could not fetch annotated commits: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::{CommandOutput, MemoryHost};
    use crate::testing::{fast_config, remote_fixture, store_for, CallLog};

    #[tokio::test]
    async fn test_fetch_overwrites_local_ref() {
        let (host, store, head) = remote_fixture();
        let ns = Namespace::from("review");

        store_for(&host, "origin")
            .set(&ns, &head, "remote")
            .await
            .unwrap();
        store.set(&ns, &head, "local, never pushed").await.unwrap();

        let outcome = store.fetch_notes(&ns, "origin").await.unwrap();
        assert_eq!(outcome, FetchOutcome::Updated);
        assert_eq!(store.get(&ns, &head).await.unwrap(), "remote");
    }

    #[tokio::test]
    async fn test_fetch_brings_annotated_commits() {
        let (host, store, _head) = remote_fixture();
        let later = host.commit("origin", 1_700_001_000);
        let ns = Namespace::default();
        store_for(&host, "origin")
            .set(&ns, &later, "on a commit local has not seen")
            .await
            .unwrap();
        assert!(!host.knows_commit("local", &later));

        store.fetch_notes(&ns, "origin").await.unwrap();

        assert!(host.knows_commit("local", &later));
        let entries = store.list_entries(&ns).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].commit, later);
    }

    #[tokio::test]
    async fn test_fetch_missing_remote_ref_is_noop() {
        let (host, store, head) = remote_fixture();
        let ns = Namespace::from("nobody-wrote-here");
        store.set(&ns, &head, "local").await.unwrap();

        let outcome = store.fetch_notes(&ns, "origin").await.unwrap();
        assert_eq!(outcome, FetchOutcome::NoRemoteNotes);
        assert_eq!(store.get(&ns, &head).await.unwrap(), "local");
        assert!(host.ref_target("origin", &ns.notes_ref()).is_none());
    }

    #[tokio::test]
    async fn test_commit_fetch_failure_is_ignored() {
        let (host, store, head) = remote_fixture();
        let ns = Namespace::default();
        store_for(&host, "origin").set(&ns, &head, "n").await.unwrap();

        host.inject_failure(
            "local",
            CallKind::FetchObjects,
            CommandOutput::failure(128, "fatal: remote error: upload-pack: not our ref\n"),
        );

        let outcome = store.fetch_notes(&ns, "origin").await.unwrap();
        assert_eq!(outcome, FetchOutcome::Updated);
    }

    #[tokio::test]
    async fn test_fetch_validates_remote() {
        let (_host, store, _head) = remote_fixture();
        let ns = Namespace::default();

        let err = store.fetch_notes(&ns, "").await.unwrap_err();
        assert!(matches!(err, NotesError::InvalidRemote { .. }));

        let err = store.fetch_notes(&ns, "nowhere").await.unwrap_err();
        assert!(matches!(err, NotesError::Unclassified { .. }));
    }

    #[tokio::test]
    async fn test_option_like_remote_never_reaches_backend() {
        let host = MemoryHost::new();
        host.init_repo("origin");
        host.commit("origin", 1_700_000_000);
        let log = Arc::new(CallLog::default());
        let backend = host.clone_repo("origin", "local").with_observer(log.clone());
        let store = NotesStore::with_config(backend, fast_config());

        for remote in ["--upload-pack=touch /tmp/pwned;", "-oorigin", "ori\0gin"] {
            let err = store.fetch_notes(&Namespace::default(), remote).await.unwrap_err();
            assert!(
                matches!(err, NotesError::InvalidRemote { remote: ref r } if r == remote),
                "{err:?}"
            );
        }
        assert!(log.calls().is_empty());
    }
}
