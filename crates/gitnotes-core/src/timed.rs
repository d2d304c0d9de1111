//! The notes interface and a timing decorator over it
//!
//! [`Notes`] is what callers program against. [`NotesStore`] implements it
//! directly; [`Timed`] wraps any implementation and logs how long each
//! operation took, so timing is layered on rather than built in.

use std::future::Future;
use std::time::Instant;

use tracing::debug;

use crate::backend::Backend;
use crate::bulk::BulkNotes;
use crate::error::NotesResult;
use crate::namespace::Namespace;
use crate::store::{NoteEntry, NotesStore};
use crate::sync::FetchOutcome;

/// Operations on a notes store
pub trait Notes: Send + Sync {
    fn get(
        &self,
        namespace: &Namespace,
        commit: &str,
    ) -> impl Future<Output = NotesResult<String>> + Send;

    fn set(
        &self,
        namespace: &Namespace,
        commit: &str,
        content: &str,
    ) -> impl Future<Output = NotesResult<()>> + Send;

    fn delete(
        &self,
        namespace: &Namespace,
        commit: &str,
    ) -> impl Future<Output = NotesResult<()>> + Send;

    fn list(&self, namespace: &Namespace) -> impl Future<Output = NotesResult<Vec<String>>> + Send;

    fn list_entries(
        &self,
        namespace: &Namespace,
    ) -> impl Future<Output = NotesResult<Vec<NoteEntry>>> + Send;

    fn get_many(
        &self,
        namespace: &Namespace,
        commits: &[String],
    ) -> impl Future<Output = BulkNotes> + Send;

    fn fetch_notes(
        &self,
        namespace: &Namespace,
        remote: &str,
    ) -> impl Future<Output = NotesResult<FetchOutcome>> + Send;

    fn push_notes(
        &self,
        namespace: &Namespace,
        remote: &str,
    ) -> impl Future<Output = NotesResult<()>> + Send;
}

impl<B: Backend> Notes for NotesStore<B> {
    fn get(
        &self,
        namespace: &Namespace,
        commit: &str,
    ) -> impl Future<Output = NotesResult<String>> + Send {
        NotesStore::get(self, namespace, commit)
    }

    fn set(
        &self,
        namespace: &Namespace,
        commit: &str,
        content: &str,
    ) -> impl Future<Output = NotesResult<()>> + Send {
        NotesStore::set(self, namespace, commit, content)
    }

    fn delete(
        &self,
        namespace: &Namespace,
        commit: &str,
    ) -> impl Future<Output = NotesResult<()>> + Send {
        NotesStore::delete(self, namespace, commit)
    }

    fn list(&self, namespace: &Namespace) -> impl Future<Output = NotesResult<Vec<String>>> + Send {
        NotesStore::list(self, namespace)
    }

    fn list_entries(
        &self,
        namespace: &Namespace,
    ) -> impl Future<Output = NotesResult<Vec<NoteEntry>>> + Send {
        NotesStore::list_entries(self, namespace)
    }

    fn get_many(
        &self,
        namespace: &Namespace,
        commits: &[String],
    ) -> impl Future<Output = BulkNotes> + Send {
        NotesStore::get_many(self, namespace, commits)
    }

    fn fetch_notes(
        &self,
        namespace: &Namespace,
        remote: &str,
    ) -> impl Future<Output = NotesResult<FetchOutcome>> + Send {
        NotesStore::fetch_notes(self, namespace, remote)
    }

    fn push_notes(
        &self,
        namespace: &Namespace,
        remote: &str,
    ) -> impl Future<Output = NotesResult<()>> + Send {
        NotesStore::push_notes(self, namespace, remote)
    }
}

/// Logs the elapsed time of every operation at debug level
#[derive(Debug, Clone)]
pub struct Timed<S> {
    inner: S,
}

impl<S: Notes> Timed<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

async fn timed<F: Future>(operation: &'static str, namespace: &Namespace, fut: F) -> F::Output {
    let start = Instant::now();
    let output = fut.await;
    debug!(
        operation,
        namespace = %namespace,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Notes operation finished"
    );
    output
}

impl<S: Notes> Notes for Timed<S> {
    async fn get(&self, namespace: &Namespace, commit: &str) -> NotesResult<String> {
        timed("get", namespace, self.inner.get(namespace, commit)).await
    }

    async fn set(&self, namespace: &Namespace, commit: &str, content: &str) -> NotesResult<()> {
        timed("set", namespace, self.inner.set(namespace, commit, content)).await
    }

    async fn delete(&self, namespace: &Namespace, commit: &str) -> NotesResult<()> {
        timed("delete", namespace, self.inner.delete(namespace, commit)).await
    }

    async fn list(&self, namespace: &Namespace) -> NotesResult<Vec<String>> {
        timed("list", namespace, self.inner.list(namespace)).await
    }

    async fn list_entries(&self, namespace: &Namespace) -> NotesResult<Vec<NoteEntry>> {
        timed("list_entries", namespace, self.inner.list_entries(namespace)).await
    }

    async fn get_many(&self, namespace: &Namespace, commits: &[String]) -> BulkNotes {
        timed("get_many", namespace, self.inner.get_many(namespace, commits)).await
    }

    async fn fetch_notes(&self, namespace: &Namespace, remote: &str) -> NotesResult<FetchOutcome> {
        timed("fetch_notes", namespace, self.inner.fetch_notes(namespace, remote)).await
    }

    async fn push_notes(&self, namespace: &Namespace, remote: &str) -> NotesResult<()> {
        timed("push_notes", namespace, self.inner.push_notes(namespace, remote)).await
    }
}
