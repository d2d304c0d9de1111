//! Annotation store
//!
//! `NotesStore` is the main entry point: single-key reads and writes against
//! one namespace at a time, plus the JSON helpers layered on top. Bulk reads
//! live in [`crate::bulk`], push and fetch in [`crate::sync`].
//!
//! ## Usage
//!
//! ```ignore
//! let store = NotesStore::with_config(GitBackend::from_config(&config), config);
//! let review = Namespace::from("review");
//!
//! store.set(&review, "HEAD", "lgtm").await?;
//! let note = store.get(&review, "HEAD").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{Backend, BackendCall, CallKind, CommandOutput};
use crate::codec::{self, Decoded};
use crate::config::Config;
use crate::error::{classify, Classification, NotesError, NotesResult};
use crate::namespace::{CommitRef, Namespace};

/// Largest note the store will write (10 MiB)
pub const MAX_NOTE_SIZE: usize = 10 * 1024 * 1024;

/// A commit that carries a note in some namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEntry {
    pub commit: String,
    pub timestamp: DateTime<Utc>,
}

/// Notes store over a [`Backend`]
///
/// Cloning is cheap and clones share the backend and the push lock.
pub struct NotesStore<B> {
    pub(crate) backend: Arc<B>,
    pub(crate) config: Config,
    /// Serializes push attempts made through this store and its clones
    pub(crate) push_lock: Arc<Mutex<()>>,
}

impl<B> Clone for NotesStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            push_lock: Arc::clone(&self.push_lock),
        }
    }
}

impl<B: Backend> NotesStore<B> {
    /// Create a store with default configuration
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, Config::default())
    }

    /// Create a store with a specific configuration
    pub fn with_config(backend: B, config: Config) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
            push_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ==================== Single-key Operations ====================

    /// Read the note attached to `commit`
    pub async fn get(&self, namespace: &Namespace, commit: &str) -> NotesResult<String> {
        let commit = self.checked_ref(commit).await?;
        let notes_ref = namespace.notes_ref();

        let out = self
            .run(&BackendCall::ReadNote {
                notes_ref: notes_ref.clone(),
                commit: commit.revision().to_string(),
            })
            .await?;
        if out.is_success() {
            return Ok(out.stdout);
        }

        match classify(CallKind::ReadNote, &out) {
            Classification::NoteNotFound => Err(NotesError::NoteNotFound {
                notes_ref,
                commit: commit.revision().to_string(),
            }),
            Classification::InvalidCommitRef => Err(invalid_ref(&commit)),
            _ => Err(NotesError::unclassified(CallKind::ReadNote, &out)),
        }
    }

    /// Like [`NotesStore::get`], but give up once `deadline` passes
    ///
    /// The in-flight backend call is dropped, which kills its process.
    pub async fn get_until(
        &self,
        namespace: &Namespace,
        commit: &str,
        deadline: Instant,
    ) -> NotesResult<String> {
        match tokio::time::timeout_at(deadline, self.get(namespace, commit)).await {
            Ok(result) => result,
            Err(_) => Err(NotesError::Cancelled { operation: "get" }),
        }
    }

    /// Attach `content` to `commit`, replacing any existing note
    pub async fn set(&self, namespace: &Namespace, commit: &str, content: &str) -> NotesResult<()> {
        let commit = CommitRef::parse(commit)?;
        if content.len() > MAX_NOTE_SIZE {
            return Err(NotesError::NoteSizeExceeded {
                size: content.len(),
                max: MAX_NOTE_SIZE,
            });
        }
        self.verify(&commit).await?;

        let out = self
            .run(&BackendCall::WriteNote {
                notes_ref: namespace.notes_ref(),
                commit: commit.revision().to_string(),
                content: content.to_string(),
            })
            .await?;
        if out.is_success() {
            debug!(namespace = %namespace, commit = %commit, bytes = content.len(), "Note written");
            return Ok(());
        }

        match classify(CallKind::WriteNote, &out) {
            Classification::InvalidCommitRef => Err(invalid_ref(&commit)),
            _ => Err(NotesError::unclassified(CallKind::WriteNote, &out)),
        }
    }

    /// Remove the note on `commit`; removing a missing note succeeds
    pub async fn delete(&self, namespace: &Namespace, commit: &str) -> NotesResult<()> {
        let commit = self.checked_ref(commit).await?;

        let out = self
            .run(&BackendCall::RemoveNote {
                notes_ref: namespace.notes_ref(),
                commit: commit.revision().to_string(),
            })
            .await?;
        if out.is_success() {
            return Ok(());
        }

        match classify(CallKind::RemoveNote, &out) {
            Classification::DeleteTargetMissing => {
                debug!(namespace = %namespace, commit = %commit, "No note to remove");
                Ok(())
            }
            Classification::InvalidCommitRef => Err(invalid_ref(&commit)),
            _ => Err(NotesError::unclassified(CallKind::RemoveNote, &out)),
        }
    }

    // ==================== Listing ====================

    /// Commits carrying a note, newest commit first
    pub async fn list(&self, namespace: &Namespace) -> NotesResult<Vec<String>> {
        Ok(self
            .list_entries(namespace)
            .await?
            .into_iter()
            .map(|entry| entry.commit)
            .collect())
    }

    /// Commits carrying a note with their commit timestamps, newest first
    ///
    /// Timestamps are looked up in a single batched call. Commits with equal
    /// timestamps keep the order the backend listed them in.
    pub async fn list_entries(&self, namespace: &Namespace) -> NotesResult<Vec<NoteEntry>> {
        let out = self
            .run(&BackendCall::ListNoteKeys {
                notes_ref: namespace.notes_ref(),
            })
            .await?;
        if !out.is_success() {
            return match classify(CallKind::ListNoteKeys, &out) {
                Classification::NotesRefNotFound => Ok(Vec::new()),
                _ => Err(NotesError::unclassified(CallKind::ListNoteKeys, &out)),
            };
        }

        let commits = parse_note_keys(&out.stdout);
        if commits.is_empty() {
            return Ok(Vec::new());
        }

        let out = self
            .run(&BackendCall::BatchGetTimestamp {
                commits: commits.clone(),
            })
            .await?;
        if !out.is_success() {
            return Err(NotesError::unclassified(CallKind::BatchGetTimestamp, &out));
        }
        let timestamps = parse_timestamps(&out.stdout)?;

        let mut entries = commits
            .into_iter()
            .map(|commit| {
                let timestamp = timestamps.get(&commit).copied().ok_or_else(|| {
                    NotesError::UnexpectedOutput {
                        operation: CallKind::BatchGetTimestamp.name(),
                        details: format!("no timestamp for {}", commit),
                    }
                })?;
                Ok(NoteEntry { commit, timestamp })
            })
            .collect::<NotesResult<Vec<_>>>()?;

        // Stable, so ties keep listing order
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    // ==================== JSON Helpers ====================

    /// Decode the note on `commit` as a stream of JSON documents
    ///
    /// A missing note is an empty stream. Decode failures come back inside
    /// [`Decoded`] together with whatever was read before them.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &Namespace,
        commit: &str,
    ) -> NotesResult<Decoded<T>> {
        match self.get(namespace, commit).await {
            Ok(content) => Ok(codec::decode(&content)),
            Err(err) if err.is_not_found() => Ok(Decoded::empty()),
            Err(err) => Err(err),
        }
    }

    /// Replace the note on `commit` with `value` encoded as one JSON document
    pub async fn set_json<T: Serialize + ?Sized + Sync>(
        &self,
        namespace: &Namespace,
        commit: &str,
        value: &T,
    ) -> NotesResult<()> {
        let content = codec::encode(value)?;
        self.set(namespace, commit, &content).await
    }

    // ==================== Internals ====================

    pub(crate) async fn run(&self, call: &BackendCall) -> NotesResult<CommandOutput> {
        Ok(self.backend.execute(call).await?)
    }

    /// Validate syntactically, then resolve if configured to
    pub(crate) async fn checked_ref(&self, commit: &str) -> NotesResult<CommitRef> {
        let commit = CommitRef::parse(commit)?;
        self.verify(&commit).await?;
        Ok(commit)
    }

    async fn verify(&self, commit: &CommitRef) -> NotesResult<()> {
        if !self.config.verify_refs || commit.is_head() {
            return Ok(());
        }

        let out = self
            .run(&BackendCall::ResolveRevision {
                revision: commit.revision().to_string(),
            })
            .await?;
        if out.is_success() {
            return Ok(());
        }
        match classify(CallKind::ResolveRevision, &out) {
            Classification::InvalidCommitRef => Err(invalid_ref(commit)),
            _ => Err(NotesError::unclassified(CallKind::ResolveRevision, &out)),
        }
    }
}

fn invalid_ref(commit: &CommitRef) -> NotesError {
    NotesError::InvalidCommitRef {
        commit: commit.as_str().to_string(),
    }
}

/// `git notes list` prints `<note object> <annotated object>` per line
fn parse_note_keys(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

/// Parse `<hash> <unix seconds>` lines
fn parse_timestamps(output: &str) -> NotesResult<HashMap<String, DateTime<Utc>>> {
    let mut timestamps = HashMap::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let malformed = || NotesError::UnexpectedOutput {
            operation: CallKind::BatchGetTimestamp.name(),
            details: format!("malformed line '{}'", line),
        };
        let (hash, secs) = line.trim().split_once(' ').ok_or_else(malformed)?;
        let secs: i64 = secs.trim().parse().map_err(|_| malformed())?;
        let timestamp = DateTime::from_timestamp(secs, 0).ok_or_else(malformed)?;
        timestamps.insert(hash.to_string(), timestamp);
    }
    Ok(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::testing::{fixture, CallLog};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Review {
        reviewer: String,
        approved: bool,
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let (_host, store, head) = fixture();
        let ns = Namespace::from("review");

        let content = "  lgtm\n\nwith trailing whitespace  \n";
        store.set(&ns, &head, content).await.unwrap();

        assert_eq!(store.get(&ns, &head).await.unwrap(), content);
        assert_eq!(store.get(&ns, "").await.unwrap(), content);
        assert_eq!(store.get(&ns, "HEAD").await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let (_host, store, head) = fixture();
        let ns = Namespace::default();

        store.set(&ns, &head, "first").await.unwrap();
        store.set(&ns, &head, "second").await.unwrap();
        assert_eq!(store.get(&ns, &head).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (_host, store, head) = fixture();

        store.set(&"a".into(), &head, "in a").await.unwrap();
        let err = store.get(&"b".into(), &head).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_oversize_set_makes_no_backend_call() {
        let host = crate::backend::MemoryHost::new();
        let log = Arc::new(CallLog::default());
        let backend = host.init_repo("local").with_observer(log.clone());
        host.commit("local", 1_700_000_000);
        let store = NotesStore::new(backend);

        let content = "x".repeat(MAX_NOTE_SIZE + 1);
        let err = store.set(&Namespace::default(), "", &content).await.unwrap_err();

        match err {
            NotesError::NoteSizeExceeded { size, max } => {
                assert_eq!(size, MAX_NOTE_SIZE + 1);
                assert_eq!(max, MAX_NOTE_SIZE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_note_at_size_limit_is_accepted() {
        let (_host, store, head) = fixture();
        let content = "x".repeat(MAX_NOTE_SIZE);
        store.set(&Namespace::default(), &head, &content).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_note() {
        let (_host, store, head) = fixture();
        let err = store.get(&Namespace::default(), &head).await.unwrap_err();
        assert!(matches!(err, NotesError::NoteNotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_refs_rejected_before_backend() {
        let host = crate::backend::MemoryHost::new();
        let log = Arc::new(CallLog::default());
        let store = NotesStore::new(host.init_repo("local").with_observer(log.clone()));
        let ns = Namespace::default();

        for bad in ["--force", "-n", "abc\0def"] {
            let err = store.get(&ns, bad).await.unwrap_err();
            assert!(matches!(err, NotesError::InvalidCommitRef { .. }), "{bad:?}");
            let err = store.set(&ns, bad, "x").await.unwrap_err();
            assert!(matches!(err, NotesError::InvalidCommitRef { .. }), "{bad:?}");
        }
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_ref() {
        let (_host, store, _head) = fixture();
        let err = store
            .get(&Namespace::default(), "0000000000000000000000000000000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, NotesError::InvalidCommitRef { .. }));
    }

    #[tokio::test]
    async fn test_non_ascii_ancestry_suffix_is_invalid() {
        let (_host, store, _head) = fixture();
        for commit in ["HEAD~é", "HEAD^ü", "HEAD~1日"] {
            let err = store.get(&Namespace::default(), commit).await.unwrap_err();
            assert!(matches!(err, NotesError::InvalidCommitRef { .. }), "{err:?}");
        }
    }

    #[tokio::test]
    async fn test_unverified_ref_still_classified() {
        let host = crate::backend::MemoryHost::new();
        let backend = host.init_repo("local");
        host.commit("local", 1);
        let config = Config {
            verify_refs: false,
            ..Config::default()
        };
        let store = NotesStore::with_config(backend, config);

        let err = store
            .get(&Namespace::default(), "no-such-branch")
            .await
            .unwrap_err();
        assert!(matches!(err, NotesError::InvalidCommitRef { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_host, store, head) = fixture();
        let ns = Namespace::default();

        store.set(&ns, &head, "bye").await.unwrap();
        store.delete(&ns, &head).await.unwrap();
        store.delete(&ns, &head).await.unwrap();

        let err = store.get(&ns, &head).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_one_timestamp_call() {
        let host = crate::backend::MemoryHost::new();
        let log = Arc::new(CallLog::default());
        let backend: MemoryBackend = host.init_repo("local").with_observer(log.clone());
        let oldest = host.commit("local", 1_600_000_000);
        let middle = host.commit("local", 1_650_000_000);
        let newest = host.commit("local", 1_700_000_000);
        let store = NotesStore::new(backend);
        let ns = Namespace::from("review");

        for commit in [&middle, &oldest, &newest] {
            store.set(&ns, commit, "note").await.unwrap();
        }
        log.clear();

        let entries = store.list_entries(&ns).await.unwrap();
        let commits: Vec<_> = entries.iter().map(|e| e.commit.clone()).collect();
        assert_eq!(commits, vec![newest.clone(), middle, oldest]);
        assert_eq!(entries[0].timestamp.timestamp(), 1_700_000_000);

        let kinds = log.kinds();
        assert_eq!(
            kinds,
            vec![CallKind::ListNoteKeys, CallKind::BatchGetTimestamp]
        );
    }

    #[tokio::test]
    async fn test_list_missing_namespace_is_empty() {
        let (_host, store, _head) = fixture();
        assert!(store.list(&"nothing-here".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_ties_keep_listing_order() {
        let host = crate::backend::MemoryHost::new();
        let backend = host.init_repo("local");
        let a = host.commit("local", 500);
        let b = host.commit("local", 500);
        let store = NotesStore::new(backend);
        let ns = Namespace::default();
        store.set(&ns, &a, "a").await.unwrap();
        store.set(&ns, &b, "b").await.unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list(&ns).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_list_outside_repository_fails() {
        let host = crate::backend::MemoryHost::new();
        let store = NotesStore::new(host.backend("never-created"));
        let err = store.list(&Namespace::default()).await.unwrap_err();
        assert!(matches!(err, NotesError::Unclassified { .. }));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let (_host, store, head) = fixture();
        let ns = Namespace::from("reviews");

        let empty = store.get_json::<Review>(&ns, &head).await.unwrap();
        assert!(empty.values.is_empty() && empty.is_complete());

        let review = Review {
            reviewer: "sam".into(),
            approved: true,
        };
        store.set_json(&ns, &head, &review).await.unwrap();

        let decoded = store.get_json::<Review>(&ns, &head).await.unwrap();
        assert_eq!(decoded.into_result().unwrap(), vec![review]);
    }

    #[tokio::test]
    async fn test_json_partial_decode() {
        let (_host, store, head) = fixture();
        let ns = Namespace::default();
        store
            .set(&ns, &head, "{\"reviewer\":\"a\",\"approved\":false}\n{oops")
            .await
            .unwrap();

        let decoded = store.get_json::<Review>(&ns, &head).await.unwrap();
        assert_eq!(decoded.values.len(), 1);
        assert_eq!(decoded.error.map(|e| e.decoded()), Some(1));
    }

    #[tokio::test]
    async fn test_get_until_cancels() {
        let host = crate::backend::MemoryHost::new();
        let backend = host
            .init_repo("local")
            .with_latency(Duration::from_secs(30));
        host.commit("local", 1);
        let store = NotesStore::new(backend);

        let deadline = Instant::now() + Duration::from_millis(20);
        let err = store
            .get_until(&Namespace::default(), "", deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, NotesError::Cancelled { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_timestamps_rejects_garbage() {
        assert!(parse_timestamps("abc 12\n").is_ok());
        assert!(parse_timestamps("abc twelve\n").is_err());
        assert!(parse_timestamps("abc\n").is_err());
    }
}
