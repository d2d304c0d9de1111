//! Bounded-concurrency bulk reads
//!
//! Reads many notes from one namespace at once without letting the number
//! of backend processes grow with the input. Each ref is read exactly like
//! [`NotesStore::get`]; the caller gets every outcome back, keyed by the ref
//! string it passed in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::backend::Backend;
use crate::error::NotesError;
use crate::namespace::{CommitRef, Namespace};
use crate::store::NotesStore;

/// Outcome of [`NotesStore::get_many`]
///
/// Every distinct input ref lands in exactly one of the two maps.
#[derive(Debug, Default)]
pub struct BulkNotes {
    pub notes: HashMap<String, String>,
    pub errors: HashMap<String, NotesError>,
}

impl BulkNotes {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Refs that came back without a note, as opposed to failing outright
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.errors
            .iter()
            .filter(|(_, err)| err.is_not_found())
            .map(|(commit, _)| commit.as_str())
    }
}

impl<B: Backend> NotesStore<B> {
    /// Read the notes on several commits concurrently
    ///
    /// Malformed refs are rejected up front and never reach the backend. At
    /// most `bulk_concurrency` reads are in flight at once. A failing ref is
    /// recorded in [`BulkNotes::errors`] and does not stop the others.
    pub async fn get_many<I>(&self, namespace: &Namespace, commits: I) -> BulkNotes
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut result = BulkNotes::default();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for commit in commits {
            let commit = commit.as_ref();
            if !seen.insert(commit.to_string()) {
                continue;
            }
            match CommitRef::parse(commit) {
                Ok(_) => pending.push(commit.to_string()),
                Err(err) => {
                    result.errors.insert(commit.to_string(), err);
                }
            }
        }

        if pending.is_empty() {
            return result;
        }

        let limit = self.config.bulk_concurrency.max(1);
        let permits = Arc::new(Semaphore::new(limit));
        debug!(namespace = %namespace, refs = pending.len(), limit, "Reading notes in bulk");

        let mut tasks = JoinSet::new();
        for commit in pending {
            let store = self.clone();
            let namespace = namespace.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => store.get(&namespace, &commit).await,
                    Err(_) => Err(NotesError::Cancelled {
                        operation: "get_many",
                    }),
                };
                (commit, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((commit, Ok(content))) => {
                    result.notes.insert(commit, content);
                }
                Ok((commit, Err(err))) => {
                    result.errors.insert(commit, err);
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => debug!(error = %err, "Bulk read task cancelled"),
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, BackendError, CallObserver, CommandOutput, MemoryHost};
    use crate::config::Config;
    use crate::testing::fixture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks the most calls ever in flight at once
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CallObserver for InFlight {
        fn before(&self, _call: &BackendCall) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn after(&self, _call: &BackendCall, _outcome: Result<&CommandOutput, &BackendError>) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_get_many_partitions_results() {
        let (host, store, head) = fixture();
        let second = host.commit("local", 1_700_000_100);
        let bare = host.commit("local", 1_700_000_200);
        let ns = Namespace::from("review");

        store.set(&ns, &head, "first").await.unwrap();
        store.set(&ns, &second, "second").await.unwrap();

        let refs = vec![
            head.clone(),
            second.clone(),
            bare.clone(),
            "--upload-pack=evil".to_string(),
            "ffffffffffffffffffffffffffffffffffffffff".to_string(),
            head.clone(),
        ];
        let result = store.get_many(&ns, &refs).await;

        assert_eq!(result.notes.len(), 2);
        assert_eq!(result.notes[&head], "first");
        assert_eq!(result.notes[&second], "second");

        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[&bare].is_not_found());
        assert!(matches!(
            result.errors["--upload-pack=evil"],
            NotesError::InvalidCommitRef { .. }
        ));
        assert!(matches!(
            result.errors["ffffffffffffffffffffffffffffffffffffffff"],
            NotesError::InvalidCommitRef { .. }
        ));
        assert_eq!(result.missing().collect::<Vec<_>>(), vec![bare.as_str()]);
        assert!(!result.is_complete());
    }

    #[tokio::test]
    async fn test_get_many_empty_input() {
        let (_host, store, _head) = fixture();
        let result = store.get_many(&Namespace::default(), Vec::<String>::new()).await;
        assert!(result.notes.is_empty());
        assert!(result.is_complete());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_many_respects_concurrency_bound() {
        let host = MemoryHost::new();
        let tracker = Arc::new(InFlight::default());
        host.init_repo("local");
        let commits: Vec<String> = (0..24).map(|i| host.commit("local", 1_000 + i)).collect();

        let writer = NotesStore::new(host.backend("local"));
        for commit in &commits {
            writer.set(&Namespace::default(), commit, "n").await.unwrap();
        }

        let backend = host
            .backend("local")
            .with_latency(Duration::from_millis(5))
            .with_observer(tracker.clone());
        let config = Config {
            bulk_concurrency: 3,
            ..Config::default()
        };
        let store = NotesStore::with_config(backend, config);

        let result = store.get_many(&Namespace::default(), &commits).await;
        assert_eq!(result.notes.len(), commits.len());

        let peak = tracker.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight calls was {peak}");
        assert!(peak >= 2, "reads never overlapped");
    }
}
