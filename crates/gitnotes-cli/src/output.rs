//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use gitnotes_core::{BulkNotes, NoteEntry};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print the content of one note
    ///
    /// Quiet mode still prints the content: it is the whole point of `get`.
    pub fn print_note(&self, commit: &str, content: &str) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"commit": commit, "content": content})
                );
            }
            OutputFormat::Human | OutputFormat::Quiet => {
                print!("{}", content);
                if !content.is_empty() && !content.ends_with('\n') {
                    println!();
                }
            }
        }
    }

    /// Print listed notes, newest first
    pub fn print_entries(&self, entries: &[NoteEntry]) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("No notes found.");
                    return;
                }
                for entry in entries {
                    println!(
                        "{}  {}",
                        short_hash(&entry.commit),
                        entry.timestamp.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} note(s)", entries.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!(entries));
            }
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.commit);
                }
            }
        }
    }

    /// Print the outcome of a bulk read, in the order the refs were given
    pub fn print_bulk(&self, commits: &[String], bulk: &BulkNotes) {
        match self.format {
            OutputFormat::Human => {
                for commit in commits {
                    if let Some(content) = bulk.notes.get(commit) {
                        println!("── {} ──", commit);
                        println!("{}", content.trim_end());
                    } else if let Some(err) = bulk.errors.get(commit) {
                        println!("── {} ── (error)", commit);
                        println!("{}", err);
                    }
                }
                println!(
                    "\n{} note(s), {} error(s)",
                    bulk.notes.len(),
                    bulk.errors.len()
                );
            }
            OutputFormat::Json => {
                let errors: serde_json::Map<_, _> = bulk
                    .errors
                    .iter()
                    .map(|(commit, err)| (commit.clone(), serde_json::json!(err.to_string())))
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({"notes": bulk.notes, "errors": errors})
                );
            }
            OutputFormat::Quiet => {
                for commit in commits {
                    if bulk.notes.contains_key(commit) {
                        println!("{}", commit);
                    }
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// First 12 characters of a commit hash
fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
