//! Error handling
//!
//! Two halves live here:
//!
//! - [`NotesError`], the typed errors every public operation returns
//! - [`classify`], which maps a failed backend call's exit status and
//!   diagnostics onto a closed set of outcomes
//!
//! Backend diagnostics are free-form and vary between git versions, so the
//! classifier only names a specific kind when the text and the failing
//! operation agree. Everything else is [`Classification::Unclassified`] and
//! is surfaced verbatim.

use thiserror::Error;

use crate::backend::{BackendError, CallKind, CommandOutput};
use crate::codec::DecodeError;

/// Errors returned by store and sync operations
#[derive(Error, Debug)]
pub enum NotesError {
    /// The commit exists but has no note in this namespace
    #[error("No note found for commit {commit} in {notes_ref}")]
    NoteNotFound { notes_ref: String, commit: String },

    /// The commit reference is malformed or does not resolve
    #[error("Invalid or non-existent commit reference: '{commit}'")]
    InvalidCommitRef { commit: String },

    /// Note content is larger than the backend is allowed to store
    #[error("Note size {size} exceeds maximum allowed size {max}")]
    NoteSizeExceeded { size: usize, max: usize },

    /// A remote name was empty or looked like a command-line option
    #[error("Invalid remote name '{remote}'")]
    InvalidRemote { remote: String },

    /// Merging remote notes failed; the local ref has been rolled back
    #[error("Failed to merge notes from '{source_ref}' into '{notes_ref}': {details}")]
    MergeConflict {
        notes_ref: String,
        source_ref: String,
        details: String,
    },

    /// Every push attempt was rejected by a concurrent writer
    #[error("Push of '{notes_ref}' to '{remote}' failed after {attempts} attempts")]
    PushFailed {
        notes_ref: String,
        remote: String,
        attempts: u32,
    },

    /// Note content could not be decoded as a JSON stream
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// JSON encoding failed
    #[error("Failed to encode note as JSON: {0}")]
    Encode(#[from] serde_json::Error),

    /// The caller's deadline passed before the backend answered
    #[error("{operation} cancelled: deadline exceeded")]
    Cancelled { operation: &'static str },

    /// A backend failure no known pattern matched
    #[error("{operation} failed (exit status {status}): {stderr}")]
    Unclassified {
        operation: &'static str,
        status: String,
        stderr: String,
    },

    /// Backend output that should have been well-formed was not
    #[error("Unexpected output from {operation}: {details}")]
    UnexpectedOutput {
        operation: &'static str,
        details: String,
    },

    /// The backend process could not be run
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl NotesError {
    /// Wrap a failed call verbatim
    pub fn unclassified(kind: CallKind, output: &CommandOutput) -> Self {
        let status = match output.status {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        };
        let stderr = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        NotesError::Unclassified {
            operation: kind.name(),
            status,
            stderr,
        }
    }

    /// Whether retrying the same operation may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NotesError::Cancelled { .. }
                | NotesError::Backend(BackendError::TimedOut { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NotesError::NoteNotFound { .. })
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            NotesError::MergeConflict { .. } => {
                Some("Inspect both sides of the notes ref and resolve the conflict manually, then push again.")
            }
            NotesError::PushFailed { .. } => {
                Some("Another writer is pushing to the same notes ref. Wait a moment and push again.")
            }
            NotesError::NoteSizeExceeded { .. } => {
                Some("Split the content across several commits or store a pointer instead.")
            }
            NotesError::InvalidCommitRef { .. } => {
                Some("Check that the commit exists locally; fetch it from the remote if needed.")
            }
            NotesError::Backend(BackendError::Spawn { .. }) => {
                Some("Check that git is installed and on PATH, or set git_binary in the config.")
            }
            _ => None,
        }
    }
}

/// Result type for notes operations
pub type NotesResult<T> = Result<T, NotesError>;

/// Closed set of outcomes for a failed backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NoteNotFound,
    InvalidCommitRef,
    RemoteRefNotFound,
    NotesRefNotFound,
    /// Removing a note that was not there; callers treat this as success
    DeleteTargetMissing,
    /// Another writer moved the remote ref; retry after re-fetching
    PushConflict,
    MergeConflict,
    /// Nothing to merge; callers treat this as success
    MergeAlreadyCurrent,
    Unclassified,
}

/// Classify the outcome of a backend call that did not succeed
///
/// `kind` scopes the patterns: "does not exist" means something different
/// coming from a notes listing than from a fetch.
pub fn classify(kind: CallKind, output: &CommandOutput) -> Classification {
    let stderr = output.stderr.to_lowercase();
    let combined = output.combined().to_lowercase();
    let status = output.status;

    // Merge outcomes are reported on either stream, sometimes with status 0
    if kind == CallKind::MergeRef {
        if contains_any(
            &combined,
            &["already up to date", "already up-to-date", "nothing to merge"],
        ) {
            return Classification::MergeAlreadyCurrent;
        }
        if status != Some(0) && combined.contains("conflict") {
            return Classification::MergeConflict;
        }
        return Classification::Unclassified;
    }

    if status == Some(0) {
        return Classification::Unclassified;
    }

    match kind {
        CallKind::ResolveRevision => {
            if matches!(status, Some(1) | Some(128)) && !is_environment_failure(&stderr) {
                return Classification::InvalidCommitRef;
            }
        }
        CallKind::ReadNote => {
            if status == Some(1) && contains_any(&combined, &["no note found", "no notes found"])
            {
                return Classification::NoteNotFound;
            }
            if is_bad_revision(status, &stderr) {
                return Classification::InvalidCommitRef;
            }
        }
        CallKind::WriteNote => {
            if is_bad_revision(status, &stderr) {
                return Classification::InvalidCommitRef;
            }
        }
        CallKind::RemoveNote => {
            if status == Some(1) && stderr.contains("has no note") {
                return Classification::DeleteTargetMissing;
            }
            if is_bad_revision(status, &stderr) {
                return Classification::InvalidCommitRef;
            }
        }
        CallKind::ListNoteKeys => {
            if contains_any(&stderr, &["bad notes ref", "does not exist"]) {
                return Classification::NotesRefNotFound;
            }
        }
        CallKind::FetchRef => {
            if contains_any(
                &stderr,
                &["couldn't find remote ref", "no such ref", "invalid refspec"],
            ) || (status == Some(1) && stderr.trim().is_empty())
            {
                return Classification::RemoteRefNotFound;
            }
        }
        CallKind::PushRef => {
            if contains_any(&combined, &["non-fast-forward", "fetch first", "[rejected]"]) {
                return Classification::PushConflict;
            }
        }
        _ => {}
    }

    Classification::Unclassified
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Status 128 plus a message about the revision itself
fn is_bad_revision(status: Option<i32>, stderr: &str) -> bool {
    status == Some(128)
        && contains_any(
            stderr,
            &[
                "failed to resolve",
                "not a valid",
                "bad revision",
                "unknown revision",
                "needed a single revision",
            ],
        )
}

/// Failures that say nothing about the revision being resolved
fn is_environment_failure(stderr: &str) -> bool {
    contains_any(stderr, &["not a git repository", "permission denied"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(status: i32, stderr: &str) -> CommandOutput {
        CommandOutput::failure(status, stderr)
    }

    #[test]
    fn test_note_not_found() {
        let out = failed(1, "error: no note found for object 1a2b3c4d.\n");
        assert_eq!(classify(CallKind::ReadNote, &out), Classification::NoteNotFound);
    }

    #[test]
    fn test_note_not_found_requires_matching_status() {
        // Same text with an unexpected status is not trusted
        let out = failed(2, "error: no note found for object 1a2b3c4d.\n");
        assert_eq!(classify(CallKind::ReadNote, &out), Classification::Unclassified);
    }

    #[test]
    fn test_invalid_commit_ref() {
        let out = failed(128, "fatal: failed to resolve 'nope' as a valid ref.\n");
        assert_eq!(
            classify(CallKind::ReadNote, &out),
            Classification::InvalidCommitRef
        );
        assert_eq!(
            classify(CallKind::WriteNote, &out),
            Classification::InvalidCommitRef
        );
    }

    #[test]
    fn test_resolve_revision_failures() {
        assert_eq!(
            classify(CallKind::ResolveRevision, &failed(1, "")),
            Classification::InvalidCommitRef
        );
        assert_eq!(
            classify(
                CallKind::ResolveRevision,
                &failed(128, "fatal: Needed a single revision\n")
            ),
            Classification::InvalidCommitRef
        );
        // Outside a repository the revision is not the problem
        assert_eq!(
            classify(
                CallKind::ResolveRevision,
                &failed(128, "fatal: not a git repository (or any of the parent directories): .git\n")
            ),
            Classification::Unclassified
        );
    }

    #[test]
    fn test_delete_target_missing() {
        let out = failed(1, "error: Object 1a2b3c4d has no note\n");
        assert_eq!(
            classify(CallKind::RemoveNote, &out),
            Classification::DeleteTargetMissing
        );
    }

    #[test]
    fn test_notes_ref_not_found() {
        let out = failed(128, "fatal: bad notes ref refs/notes/missing\n");
        assert_eq!(
            classify(CallKind::ListNoteKeys, &out),
            Classification::NotesRefNotFound
        );
        // Not a repository is a real failure, not an empty namespace
        let out = failed(128, "fatal: not a git repository\n");
        assert_eq!(
            classify(CallKind::ListNoteKeys, &out),
            Classification::Unclassified
        );
    }

    #[test]
    fn test_remote_ref_not_found() {
        let out = failed(128, "fatal: couldn't find remote ref refs/notes/review\n");
        assert_eq!(
            classify(CallKind::FetchRef, &out),
            Classification::RemoteRefNotFound
        );
        assert_eq!(
            classify(CallKind::FetchRef, &failed(1, "")),
            Classification::RemoteRefNotFound
        );
    }

    #[test]
    fn test_unknown_remote_is_not_a_missing_ref() {
        let out = failed(
            128,
            "fatal: 'nowhere' does not appear to be a git repository\n\
             fatal: Could not read from remote repository.\n",
        );
        assert_eq!(classify(CallKind::FetchRef, &out), Classification::Unclassified);
    }

    #[test]
    fn test_push_conflict() {
        let out = failed(
            1,
            "To ../remote.git\n ! [rejected]        refs/notes/review -> refs/notes/review (fetch first)\n\
             error: failed to push some refs to '../remote.git'\n",
        );
        assert_eq!(classify(CallKind::PushRef, &out), Classification::PushConflict);

        let out = failed(1, " ! [rejected] refs/notes/x -> refs/notes/x (non-fast-forward)\n");
        assert_eq!(classify(CallKind::PushRef, &out), Classification::PushConflict);
    }

    #[test]
    fn test_hook_rejection_is_not_retryable() {
        let out = failed(
            1,
            " ! [remote rejected] refs/notes/x -> refs/notes/x (pre-receive hook declined)\n",
        );
        assert_eq!(classify(CallKind::PushRef, &out), Classification::Unclassified);
    }

    #[test]
    fn test_merge_outcomes() {
        let current = CommandOutput {
            status: Some(0),
            stdout: "Already up to date.\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(
            classify(CallKind::MergeRef, &current),
            Classification::MergeAlreadyCurrent
        );

        let conflict = failed(
            1,
            "Automatic notes merge failed. Fix conflicts in .git/NOTES_MERGE_WORKTREE\n",
        );
        assert_eq!(
            classify(CallKind::MergeRef, &conflict),
            Classification::MergeConflict
        );

        let other = failed(128, "fatal: refusing to merge into refs/heads/main\n");
        assert_eq!(classify(CallKind::MergeRef, &other), Classification::Unclassified);
    }

    #[test]
    fn test_case_insensitive() {
        let out = failed(1, "ERROR: NO NOTE FOUND FOR OBJECT abc\n");
        assert_eq!(classify(CallKind::ReadNote, &out), Classification::NoteNotFound);
    }

    #[test]
    fn test_unclassified_keeps_diagnostics() {
        let err = NotesError::unclassified(CallKind::PushRef, &failed(128, "fatal: boom\n"));
        let msg = err.to_string();
        assert!(msg.contains("push-ref"));
        assert!(msg.contains("128"));
        assert!(msg.contains("fatal: boom"));
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = NotesError::PushFailed {
            notes_ref: "refs/notes/x".into(),
            remote: "origin".into(),
            attempts: 3,
        };
        assert!(err.recovery_suggestion().is_some());
        assert!(err.to_string().contains("3 attempts"));
        assert!(NotesError::InvalidRemote {
            remote: String::new()
        }
        .recovery_suggestion()
        .is_none());
    }
}
