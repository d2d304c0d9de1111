//! Backend adapters
//!
//! The store never talks to git directly. It describes what it needs as a
//! [`BackendCall`] and hands it to a [`Backend`], which returns the raw exit
//! status and output. Turning that output into typed outcomes is the job of
//! [`crate::error::classify`], not the adapter's.
//!
//! Two adapters ship with the crate:
//!
//! - [`git::GitBackend`]: runs the `git` binary as a child process
//! - [`memory::MemoryBackend`]: an in-memory model used for protocol tests

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod git;
pub mod memory;

pub use git::GitBackend;
pub use memory::{MemoryBackend, MemoryHost};

/// Strategy used when merging a fetched notes ref into the local one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Union of both sides' lines, sorted, duplicates removed
    CatSortUniq,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::CatSortUniq => "cat_sort_uniq",
        }
    }
}

/// One capability request against the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// Resolve a revision expression to a full hash
    ResolveRevision { revision: String },
    /// Read the note attached to `commit`
    ReadNote { notes_ref: String, commit: String },
    /// Attach `content` to `commit`, replacing any existing note
    WriteNote {
        notes_ref: String,
        commit: String,
        content: String,
    },
    /// Remove the note attached to `commit`
    RemoveNote { notes_ref: String, commit: String },
    /// List `(note object, annotated commit)` pairs, one per line
    ListNoteKeys { notes_ref: String },
    /// `<hash> <unix timestamp>` per line for every commit, in one invocation
    BatchGetTimestamp { commits: Vec<String> },
    /// Fetch `source` from `remote` into the local `destination` ref
    FetchRef {
        remote: String,
        source: String,
        destination: String,
        force: bool,
    },
    /// Fetch a batch of commits from `remote` so they resolve locally
    FetchObjects { remote: String, commits: Vec<String> },
    /// Push `notes_ref` to the same name on `remote`
    PushRef { remote: String, notes_ref: String },
    /// Merge the notes at `source` into `notes_ref`
    MergeRef {
        notes_ref: String,
        strategy: MergeStrategy,
        source: String,
    },
    /// Abandon an in-progress notes merge on `notes_ref`
    AbortMerge { notes_ref: String },
    /// Point `name` at `hash`
    UpdateRef { name: String, hash: String },
    /// Remove `name`
    DeleteRef { name: String },
    /// Exit status 0 if `name` exists, 1 if it does not
    RefExists { name: String },
    /// Create an empty notes commit and point `name` at it
    InitializeEmptyRef { name: String },
}

/// The kind of a [`BackendCall`], without its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    ResolveRevision,
    ReadNote,
    WriteNote,
    RemoveNote,
    ListNoteKeys,
    BatchGetTimestamp,
    FetchRef,
    FetchObjects,
    PushRef,
    MergeRef,
    AbortMerge,
    UpdateRef,
    DeleteRef,
    RefExists,
    InitializeEmptyRef,
}

impl CallKind {
    pub fn name(&self) -> &'static str {
        match self {
            CallKind::ResolveRevision => "resolve-revision",
            CallKind::ReadNote => "read-note",
            CallKind::WriteNote => "write-note",
            CallKind::RemoveNote => "remove-note",
            CallKind::ListNoteKeys => "list-notes",
            CallKind::BatchGetTimestamp => "batch-timestamps",
            CallKind::FetchRef => "fetch-ref",
            CallKind::FetchObjects => "fetch-objects",
            CallKind::PushRef => "push-ref",
            CallKind::MergeRef => "merge-ref",
            CallKind::AbortMerge => "abort-merge",
            CallKind::UpdateRef => "update-ref",
            CallKind::DeleteRef => "delete-ref",
            CallKind::RefExists => "ref-exists",
            CallKind::InitializeEmptyRef => "init-empty-ref",
        }
    }
}

impl BackendCall {
    pub fn kind(&self) -> CallKind {
        match self {
            BackendCall::ResolveRevision { .. } => CallKind::ResolveRevision,
            BackendCall::ReadNote { .. } => CallKind::ReadNote,
            BackendCall::WriteNote { .. } => CallKind::WriteNote,
            BackendCall::RemoveNote { .. } => CallKind::RemoveNote,
            BackendCall::ListNoteKeys { .. } => CallKind::ListNoteKeys,
            BackendCall::BatchGetTimestamp { .. } => CallKind::BatchGetTimestamp,
            BackendCall::FetchRef { .. } => CallKind::FetchRef,
            BackendCall::FetchObjects { .. } => CallKind::FetchObjects,
            BackendCall::PushRef { .. } => CallKind::PushRef,
            BackendCall::MergeRef { .. } => CallKind::MergeRef,
            BackendCall::AbortMerge { .. } => CallKind::AbortMerge,
            BackendCall::UpdateRef { .. } => CallKind::UpdateRef,
            BackendCall::DeleteRef { .. } => CallKind::DeleteRef,
            BackendCall::RefExists { .. } => CallKind::RefExists,
            BackendCall::InitializeEmptyRef { .. } => CallKind::InitializeEmptyRef,
        }
    }
}

/// Raw result of one backend call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout and stderr together, for diagnostics that land on either stream
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        text.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stderr.is_empty() {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

/// Process-level failures: the call could not be carried out at all
///
/// A non-zero exit status is not a `BackendError`; it comes back as a
/// [`CommandOutput`] for classification.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend program could not be started
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the child process failed
    #[error("I/O error talking to backend: {0}")]
    Io(#[from] io::Error),

    /// The call exceeded the configured per-command timeout
    #[error("{call} timed out after {after:?}")]
    TimedOut { call: &'static str, after: Duration },
}

/// Capability set the store needs from a versioned-object backend
pub trait Backend: Send + Sync + 'static {
    /// Carry out one call and report its raw outcome
    fn execute(
        &self,
        call: &BackendCall,
    ) -> impl Future<Output = Result<CommandOutput, BackendError>> + Send;
}

impl<B: Backend> Backend for Arc<B> {
    fn execute(
        &self,
        call: &BackendCall,
    ) -> impl Future<Output = Result<CommandOutput, BackendError>> + Send {
        (**self).execute(call)
    }
}

/// Hook invoked around every backend call
///
/// Observers are handed to an adapter when it is built. They see each call
/// before it runs and its outcome afterwards, which is enough to count
/// calls, trace them, or inject a competing write at a precise point.
pub trait CallObserver: Send + Sync {
    fn before(&self, _call: &BackendCall) {}

    fn after(&self, _call: &BackendCall, _outcome: Result<&CommandOutput, &BackendError>) {}
}

/// The observers attached to one adapter
#[derive(Clone, Default)]
pub struct Observers(Vec<Arc<dyn CallObserver>>);

impl Observers {
    pub fn push(&mut self, observer: Arc<dyn CallObserver>) {
        self.0.push(observer);
    }

    pub fn before(&self, call: &BackendCall) {
        for observer in &self.0 {
            observer.before(call);
        }
    }

    pub fn after(&self, call: &BackendCall, outcome: &Result<CommandOutput, BackendError>) {
        let outcome = outcome.as_ref();
        for observer in &self.0 {
            observer.after(call, outcome);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Observers({})", self.0.len())
    }
}
