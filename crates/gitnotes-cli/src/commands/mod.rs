pub mod config;
pub mod notes;
pub mod sync;
