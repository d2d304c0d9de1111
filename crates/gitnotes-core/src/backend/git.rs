//! Git process adapter
//!
//! Maps each [`BackendCall`] onto one or more `git` invocations in a
//! repository directory. Children are spawned with `kill_on_drop`, so
//! dropping a call's future (a caller's deadline passing, for example)
//! terminates the process rather than leaving it running.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Backend, BackendCall, BackendError, CallObserver, CommandOutput, Observers};
use crate::config::Config;

/// Runs git subcommands against one repository
#[derive(Debug, Clone)]
pub struct GitBackend {
    program: String,
    repo: Option<PathBuf>,
    timeout: Option<Duration>,
    identity: Vec<(&'static str, String)>,
    observers: Observers,
}

impl GitBackend {
    /// Operate on the repository at `repo` with the `git` on PATH
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            program: "git".to_string(),
            repo: Some(repo.into()),
            timeout: None,
            identity: Vec::new(),
            observers: Observers::default(),
        }
    }

    /// Build from configuration; without `repo_path` the process's working
    /// directory is used
    pub fn from_config(config: &Config) -> Self {
        let mut backend = Self {
            program: config.git_binary.clone(),
            repo: config.repo_path.clone(),
            timeout: config.command_timeout(),
            identity: Vec::new(),
            observers: Observers::default(),
        };
        if let Some(ref name) = config.author_name {
            backend = backend.with_author_name(name);
        }
        if let Some(ref email) = config.author_email {
            backend = backend.with_author_email(email);
        }
        backend
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Kill any single git invocation that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Name recorded as author and committer of notes commits
    pub fn with_author_name(mut self, name: &str) -> Self {
        self.identity.push(("GIT_AUTHOR_NAME", name.to_string()));
        self.identity.push(("GIT_COMMITTER_NAME", name.to_string()));
        self
    }

    pub fn with_author_email(mut self, email: &str) -> Self {
        self.identity.push(("GIT_AUTHOR_EMAIL", email.to_string()));
        self.identity.push(("GIT_COMMITTER_EMAIL", email.to_string()));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn repo(&self) -> Option<&Path> {
        self.repo.as_deref()
    }

    async fn dispatch(&self, call: &BackendCall) -> Result<CommandOutput, BackendError> {
        match call {
            BackendCall::ResolveRevision { revision } => {
                let spec = format!("{}^{{commit}}", revision);
                self.git(&["rev-parse", "--verify", "--quiet", &spec], None)
                    .await
            }
            BackendCall::ReadNote { notes_ref, commit } => {
                self.git(&["notes", "--ref", notes_ref, "show", commit], None)
                    .await
            }
            BackendCall::WriteNote {
                notes_ref,
                commit,
                content,
            } => {
                // Store the blob ourselves so the note is kept byte for byte;
                // `notes add -m/-F` would strip whitespace.
                let blob = self
                    .git(&["hash-object", "-w", "--stdin"], Some(content.as_bytes()))
                    .await?;
                if !blob.is_success() {
                    return Ok(blob);
                }
                let blob = blob.stdout.trim().to_string();
                self.git(
                    &[
                        "notes",
                        "--ref",
                        notes_ref,
                        "add",
                        "-f",
                        "--allow-empty",
                        "-C",
                        &blob,
                        commit,
                    ],
                    None,
                )
                .await
            }
            BackendCall::RemoveNote { notes_ref, commit } => {
                self.git(&["notes", "--ref", notes_ref, "remove", commit], None)
                    .await
            }
            BackendCall::ListNoteKeys { notes_ref } => {
                self.git(&["notes", "--ref", notes_ref, "list"], None).await
            }
            BackendCall::BatchGetTimestamp { commits } => {
                let mut args = vec!["show", "-s", "--format=%H %ct"];
                args.extend(commits.iter().map(String::as_str));
                self.git(&args, None).await
            }
            BackendCall::FetchRef {
                remote,
                source,
                destination,
                force,
            } => {
                let refspec = if *force {
                    format!("+{}:{}", source, destination)
                } else {
                    format!("{}:{}", source, destination)
                };
                self.git(&["fetch", "--no-tags", "--", remote, &refspec], None)
                    .await
            }
            BackendCall::FetchObjects { remote, commits } => {
                let mut args = vec!["fetch", "--no-tags", "--", remote.as_str()];
                args.extend(commits.iter().map(String::as_str));
                self.git(&args, None).await
            }
            BackendCall::PushRef { remote, notes_ref } => {
                let refspec = format!("{}:{}", notes_ref, notes_ref);
                self.git(&["push", "--", remote, &refspec], None).await
            }
            BackendCall::MergeRef {
                notes_ref,
                strategy,
                source,
            } => {
                self.git(
                    &[
                        "notes",
                        "--ref",
                        notes_ref,
                        "merge",
                        "-s",
                        strategy.as_str(),
                        source,
                    ],
                    None,
                )
                .await
            }
            BackendCall::AbortMerge { notes_ref } => {
                self.git(&["notes", "--ref", notes_ref, "merge", "--abort"], None)
                    .await
            }
            BackendCall::UpdateRef { name, hash } => {
                self.git(&["update-ref", name, hash], None).await
            }
            BackendCall::DeleteRef { name } => self.git(&["update-ref", "-d", name], None).await,
            BackendCall::RefExists { name } => {
                self.git(&["show-ref", "--verify", "--quiet", name], None)
                    .await
            }
            BackendCall::InitializeEmptyRef { name } => self.initialize_empty_ref(name).await,
        }
    }

    /// Commit an empty tree and point `name` at it
    async fn initialize_empty_ref(&self, name: &str) -> Result<CommandOutput, BackendError> {
        let tree = self
            .git(&["hash-object", "-t", "tree", "-w", "--stdin"], Some(&[]))
            .await?;
        if !tree.is_success() {
            return Ok(tree);
        }
        let message = format!("Initialize {}", name);
        let commit = self
            .git(&["commit-tree", tree.stdout.trim(), "-m", &message], None)
            .await?;
        if !commit.is_success() {
            return Ok(commit);
        }
        self.git(&["update-ref", name, commit.stdout.trim()], None)
            .await
    }

    /// Run one git invocation, feeding `stdin` if given
    async fn git(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, BackendError> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref repo) = self.repo {
            command.current_dir(repo);
        }
        for (key, value) in &self.identity {
            command.env(key, value);
        }

        debug!(args = ?args, "running {}", self.program);
        let mut child = command.spawn().map_err(|source| BackendError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await?;
                // Closing the pipe signals EOF
                drop(pipe);
            }
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Backend for GitBackend {
    async fn execute(&self, call: &BackendCall) -> Result<CommandOutput, BackendError> {
        self.observers.before(call);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.dispatch(call)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::TimedOut {
                    call: call.kind().name(),
                    after: limit,
                }),
            },
            None => self.dispatch(call).await,
        };
        self.observers.after(call, &outcome);
        outcome
    }
}
