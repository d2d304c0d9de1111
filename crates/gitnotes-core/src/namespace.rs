//! Namespaces and commit references
//!
//! A namespace is a logical bucket of notes. Each one maps to exactly one
//! notes ref:
//!
//! - `""` → `refs/notes/commits` (git's default notes ref)
//! - `"refs/notes/review"` → unchanged
//! - `"review"` → `refs/notes/review`

use std::fmt;

use crate::error::NotesError;

/// Prefix shared by every notes ref
pub const NOTES_REF_PREFIX: &str = "refs/notes/";

/// Ref used for the empty namespace
pub const DEFAULT_NOTES_REF: &str = "refs/notes/commits";

/// A logical bucket of notes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as given by the caller
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fully qualified notes ref for this namespace
    pub fn notes_ref(&self) -> String {
        if self.0.is_empty() {
            DEFAULT_NOTES_REF.to_string()
        } else if self.0.starts_with(NOTES_REF_PREFIX) {
            self.0.clone()
        } else {
            format!("{}{}", NOTES_REF_PREFIX, self.0)
        }
    }

    /// Where a fetch from `remote` mirrors this namespace locally
    ///
    /// `refs/notes/review` fetched from `origin` lands in
    /// `refs/remotes/origin/notes/review`.
    pub fn tracking_ref(&self, remote: &str) -> String {
        let notes_ref = self.notes_ref();
        let suffix = notes_ref.strip_prefix("refs/").unwrap_or(&notes_ref);
        format!("refs/remotes/{}/{}", remote, suffix)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.notes_ref())
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Namespace {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A point in history: a hash, a revision expression, or empty for HEAD
///
/// Construction only checks that the string is safe to hand to the backend.
/// Whether it actually resolves is decided later, at the point of use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitRef(String);

impl CommitRef {
    /// Validate a revision string
    ///
    /// Rejects anything that could be read as a command-line flag and
    /// anything containing NUL. The empty string is accepted and means HEAD.
    pub fn parse(spec: &str) -> Result<Self, NotesError> {
        if spec.starts_with('-') || spec.contains('\0') {
            return Err(NotesError::InvalidCommitRef {
                commit: spec.to_string(),
            });
        }
        Ok(Self(spec.to_string()))
    }

    /// The current head
    pub fn head() -> Self {
        Self(String::new())
    }

    /// Whether this refers to the current head
    pub fn is_head(&self) -> bool {
        self.0.is_empty()
    }

    /// The expression to hand to the backend (`HEAD` for the empty ref)
    pub fn revision(&self) -> &str {
        if self.0.is_empty() {
            "HEAD"
        } else {
            &self.0
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.revision())
    }
}
