//! Shared fixtures for unit tests

use std::sync::Mutex;

use crate::backend::{BackendCall, BackendError, CallKind, CallObserver, CommandOutput};
use crate::backend::{MemoryBackend, MemoryHost};
use crate::config::Config;
use crate::store::NotesStore;

/// Records every call an adapter makes
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<BackendCall>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<CallKind> {
        self.calls().iter().map(BackendCall::kind).collect()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl CallObserver for CallLog {
    fn before(&self, call: &BackendCall) {
        self.calls.lock().unwrap().push(call.clone());
    }

    fn after(&self, _call: &BackendCall, _outcome: Result<&CommandOutput, &BackendError>) {}
}

/// Config with a backoff short enough for tests
pub fn fast_config() -> Config {
    Config {
        push_backoff_ms: 1,
        ..Config::default()
    }
}

/// A repository named `local` with one commit; returns that commit's hash
pub fn fixture() -> (MemoryHost, NotesStore<MemoryBackend>, String) {
    let host = MemoryHost::new();
    let backend = host.init_repo("local");
    let head = host.commit("local", 1_700_000_000);
    (host, NotesStore::with_config(backend, fast_config()), head)
}

/// `origin` with one commit, cloned as `local`
pub fn remote_fixture() -> (MemoryHost, NotesStore<MemoryBackend>, String) {
    let host = MemoryHost::new();
    host.init_repo("origin");
    let head = host.commit("origin", 1_700_000_000);
    let backend = host.clone_repo("origin", "local");
    (host, NotesStore::with_config(backend, fast_config()), head)
}

/// A store over an existing repository of `host`
pub fn store_for(host: &MemoryHost, repo: &str) -> NotesStore<MemoryBackend> {
    NotesStore::with_config(host.backend(repo), fast_config())
}
