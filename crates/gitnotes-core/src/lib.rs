//! gitnotes core library
//!
//! A namespaced key-value annotation store on top of git notes. Keys are
//! commits, values are text (often a stream of JSON documents), and
//! namespaces are notes refs that can be shared through a remote.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = NotesStore::with_config(GitBackend::from_config(&config), config);
//! let review = Namespace::from("review");
//!
//! store.set_json(&review, "HEAD", &verdict).await?;
//! store.push_notes(&review, "origin").await?;
//! ```
//!
//! # Modules
//!
//! - `store`: single-key operations and JSON helpers (main entry point)
//! - `bulk`: concurrent reads of many keys
//! - `sync`: push with merge and retry, fetch
//! - `codec`: concatenated JSON documents with partial results
//! - `error`: error types and the backend error classifier
//! - `backend`: the git process adapter and an in-memory model
//! - `timed`: the `Notes` trait and a timing decorator
//! - `config`: application configuration

pub mod backend;
pub mod bulk;
pub mod codec;
pub mod config;
pub mod error;
pub mod namespace;
pub mod store;
pub mod sync;
pub mod timed;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendCall, BackendError, CallKind, CallObserver, CommandOutput};
pub use backend::{GitBackend, MemoryBackend, MemoryHost};
pub use bulk::BulkNotes;
pub use codec::{DecodeError, Decoded, MAX_JSON_DOCUMENTS};
pub use config::{Config, ConfigError};
pub use error::{classify, Classification, NotesError, NotesResult};
pub use namespace::{CommitRef, Namespace};
pub use store::{NoteEntry, NotesStore, MAX_NOTE_SIZE};
pub use sync::{retry_delay, FetchOutcome, RemoteTrackingState};
pub use timed::{Notes, Timed};
