//! In-memory backend
//!
//! A small model of several git repositories sharing one process: each
//! repository has a head, a set of known commits, refs, and named remotes
//! pointing at other repositories. Notes refs point at notes commits whose
//! ancestry is tracked, so fast-forward checks, fetches, pushes and
//! `cat_sort_uniq` merges behave like the real thing.
//!
//! Failures are reported the way git reports them (exit status plus
//! diagnostic text) so the classifier sees realistic input.
//!
//! ```ignore
//! let host = MemoryHost::new();
//! let origin = host.init_repo("origin");
//! let local = host.clone_repo("origin", "local");
//! let sha = host.commit("local", 1_700_000_000);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    Backend, BackendCall, BackendError, CallKind, CallObserver, CommandOutput, MergeStrategy,
    Observers,
};

#[derive(Debug, Clone)]
struct CommitInfo {
    parent: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Clone, Default)]
struct NotesCommit {
    parents: Vec<String>,
    notes: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Repo {
    head: Option<String>,
    known: HashSet<String>,
    refs: BTreeMap<String, String>,
    remotes: HashMap<String, String>,
    merging: HashSet<String>,
}

#[derive(Debug)]
struct InjectedFailure {
    repo: String,
    kind: CallKind,
    output: CommandOutput,
}

#[derive(Debug, Default)]
struct World {
    commits: HashMap<String, CommitInfo>,
    notes_commits: HashMap<String, NotesCommit>,
    repos: HashMap<String, Repo>,
    failures: Vec<InjectedFailure>,
    next_id: u64,
}

/// Shared state behind every [`MemoryBackend`] created from it
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    world: Arc<Mutex<World>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty repository and return a backend bound to it
    pub fn init_repo(&self, name: &str) -> MemoryBackend {
        self.lock().repos.entry(name.to_string()).or_default();
        self.backend(name)
    }

    /// Create `name` with the same history as `source`, and `origin` → `source`
    pub fn clone_repo(&self, source: &str, name: &str) -> MemoryBackend {
        {
            let mut world = self.lock();
            let (head, known) = match world.repos.get(source) {
                Some(repo) => (repo.head.clone(), repo.known.clone()),
                None => (None, HashSet::new()),
            };
            let repo = world.repos.entry(name.to_string()).or_default();
            repo.head = head;
            repo.known = known;
            repo.remotes.insert("origin".to_string(), source.to_string());
        }
        self.backend(name)
    }

    /// A backend operating on the repository called `name`
    pub fn backend(&self, name: &str) -> MemoryBackend {
        MemoryBackend {
            host: self.clone(),
            repo: name.to_string(),
            latency: None,
            observers: Observers::default(),
        }
    }

    /// Register `target` as remote `remote` of `repo`
    pub fn add_remote(&self, repo: &str, remote: &str, target: &str) {
        let mut world = self.lock();
        let repo = world.repos.entry(repo.to_string()).or_default();
        repo.remotes.insert(remote.to_string(), target.to_string());
    }

    /// Create a commit on top of `repo`'s head and return its hash
    pub fn commit(&self, repo: &str, timestamp: i64) -> String {
        let mut world = self.lock();
        let id = world.allocate_id();
        let parent = world.repos.get(repo).and_then(|r| r.head.clone());
        world
            .commits
            .insert(id.clone(), CommitInfo { parent, timestamp });
        let repo = world.repos.entry(repo.to_string()).or_default();
        repo.head = Some(id.clone());
        repo.known.insert(id.clone());
        id
    }

    /// Where `name` points in `repo`, if it exists
    pub fn ref_target(&self, repo: &str, name: &str) -> Option<String> {
        self.lock()
            .repos
            .get(repo)
            .and_then(|r| r.refs.get(name).cloned())
    }

    /// Every note reachable from `notes_ref` in `repo`
    pub fn notes(&self, repo: &str, notes_ref: &str) -> BTreeMap<String, String> {
        let world = self.lock();
        world
            .repos
            .get(repo)
            .and_then(|r| r.refs.get(notes_ref))
            .and_then(|id| world.notes_commits.get(id))
            .map(|c| c.notes.clone())
            .unwrap_or_default()
    }

    /// Whether a notes merge is recorded as in progress on `notes_ref`
    pub fn merge_in_progress(&self, repo: &str, notes_ref: &str) -> bool {
        self.lock()
            .repos
            .get(repo)
            .map(|r| r.merging.contains(notes_ref))
            .unwrap_or(false)
    }

    /// Whether `repo` has the commit object `hash`
    pub fn knows_commit(&self, repo: &str, hash: &str) -> bool {
        self.lock()
            .repos
            .get(repo)
            .map(|r| r.known.contains(hash))
            .unwrap_or(false)
    }

    /// Make the next `kind` call against `repo` fail with `output`
    ///
    /// A failed merge still moves the ref first and leaves the merge marked
    /// in progress, as git does when it stops on a conflict.
    pub fn inject_failure(&self, repo: &str, kind: CallKind, output: CommandOutput) {
        self.lock().failures.push(InjectedFailure {
            repo: repo.to_string(),
            kind,
            output,
        });
    }
}

/// [`Backend`] over one repository of a [`MemoryHost`]
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    host: MemoryHost,
    repo: String,
    latency: Option<Duration>,
    observers: Observers,
}

impl MemoryBackend {
    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Delay every call, so concurrent callers actually overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn host(&self) -> &MemoryHost {
        &self.host
    }

    pub fn repo_name(&self) -> &str {
        &self.repo
    }

    /// Run a call synchronously, without observers or latency
    ///
    /// Observers use this to act as a competing writer mid-protocol.
    pub fn execute_now(&self, call: &BackendCall) -> CommandOutput {
        let mut world = self.host.lock();
        let kind = call.kind();
        let injected = world
            .failures
            .iter()
            .position(|f| f.repo == self.repo && f.kind == kind)
            .map(|i| world.failures.remove(i));

        match injected {
            Some(failure) => {
                if let BackendCall::MergeRef { notes_ref, .. } = call {
                    let _ = world.run(&self.repo, call);
                    if let Some(repo) = world.repos.get_mut(&self.repo) {
                        repo.merging.insert(notes_ref.clone());
                    }
                }
                failure.output
            }
            None => world.run(&self.repo, call),
        }
    }
}

impl Backend for MemoryBackend {
    async fn execute(&self, call: &BackendCall) -> Result<CommandOutput, BackendError> {
        self.observers.before(call);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let outcome = Ok(self.execute_now(call));
        self.observers.after(call, &outcome);
        outcome
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput::success(stdout)
}

fn fail(status: i32, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput::failure(status, stderr)
}

fn unknown_repo() -> CommandOutput {
    fail(
        128,
        "fatal: not a git repository (or any of the parent directories): .git\n",
    )
}

fn unknown_remote(remote: &str) -> CommandOutput {
    fail(
        128,
        format!(
            "fatal: '{}' does not appear to be a git repository\n\
             fatal: Could not read from remote repository.\n",
            remote
        ),
    )
}

fn blob_id(content: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}{:024x}", hasher.finish(), content.len())
}

/// Lines of both notes, sorted, duplicates removed
fn cat_sort_uniq(ours: &str, theirs: &str) -> String {
    let mut lines: Vec<&str> = ours
        .lines()
        .chain(theirs.lines())
        .filter(|line| !line.is_empty())
        .collect();
    lines.sort_unstable();
    lines.dedup();
    let mut merged = lines.join("\n");
    merged.push('\n');
    merged
}

impl World {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        let mixed = self.next_id.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        format!(
            "{:016x}{:016x}{:08x}",
            mixed,
            mixed.rotate_left(29),
            self.next_id
        )
    }

    fn run(&mut self, repo: &str, call: &BackendCall) -> CommandOutput {
        if !self.repos.contains_key(repo) {
            return unknown_repo();
        }
        match call {
            BackendCall::ResolveRevision { revision } => match self.resolve(repo, revision) {
                Some(hash) => ok(format!("{}\n", hash)),
                None => fail(1, ""),
            },
            BackendCall::ReadNote { notes_ref, commit } => {
                let Some(hash) = self.resolve_commit(repo, commit) else {
                    return fail(
                        128,
                        format!("fatal: failed to resolve '{}' as a valid ref.\n", commit),
                    );
                };
                match self.notes_at(repo, notes_ref).get(&hash) {
                    Some(content) => ok(content.clone()),
                    None => fail(1, format!("error: no note found for object {}.\n", hash)),
                }
            }
            BackendCall::WriteNote {
                notes_ref,
                commit,
                content,
            } => {
                let Some(hash) = self.resolve_commit(repo, commit) else {
                    return fail(
                        128,
                        format!("fatal: failed to resolve '{}' as a valid ref.\n", commit),
                    );
                };
                let mut notes = self.notes_at(repo, notes_ref);
                let existed = notes.insert(hash.clone(), content.clone()).is_some();
                self.commit_notes(repo, notes_ref, notes);
                if existed {
                    CommandOutput {
                        status: Some(0),
                        stdout: String::new(),
                        stderr: format!("Overwriting existing notes for object {}\n", hash),
                    }
                } else {
                    ok("")
                }
            }
            BackendCall::RemoveNote { notes_ref, commit } => {
                let Some(hash) = self.resolve_commit(repo, commit) else {
                    return fail(
                        128,
                        format!("fatal: failed to resolve '{}' as a valid ref.\n", commit),
                    );
                };
                let mut notes = self.notes_at(repo, notes_ref);
                if notes.remove(&hash).is_none() {
                    return fail(1, format!("error: Object {} has no note\n", hash));
                }
                self.commit_notes(repo, notes_ref, notes);
                CommandOutput {
                    status: Some(0),
                    stdout: String::new(),
                    stderr: format!("Removing note for object {}\n", hash),
                }
            }
            BackendCall::ListNoteKeys { notes_ref } => {
                let listing: String = self
                    .notes_at(repo, notes_ref)
                    .iter()
                    .map(|(commit, content)| format!("{} {}\n", blob_id(content), commit))
                    .collect();
                ok(listing)
            }
            BackendCall::BatchGetTimestamp { commits } => {
                let mut out = String::new();
                for commit in commits {
                    let Some(hash) = self.resolve_commit(repo, commit) else {
                        return fail(
                            128,
                            format!(
                                "fatal: ambiguous argument '{}': unknown revision or path not in the working tree.\n",
                                commit
                            ),
                        );
                    };
                    let timestamp = self.commits.get(&hash).map(|c| c.timestamp).unwrap_or(0);
                    out.push_str(&format!("{} {}\n", hash, timestamp));
                }
                ok(out)
            }
            BackendCall::FetchRef {
                remote,
                source,
                destination,
                force,
            } => self.fetch_ref(repo, remote, source, destination, *force),
            BackendCall::FetchObjects { remote, commits } => {
                let Some(remote_repo) = self.remote_repo(repo, remote) else {
                    return unknown_remote(remote);
                };
                let available = self
                    .repos
                    .get(&remote_repo)
                    .map(|r| r.known.clone())
                    .unwrap_or_default();
                if let Some(missing) = commits.iter().find(|c| !available.contains(*c)) {
                    return fail(
                        128,
                        format!("fatal: remote error: upload-pack: not our ref {}\n", missing),
                    );
                }
                if let Some(local) = self.repos.get_mut(repo) {
                    local.known.extend(commits.iter().cloned());
                }
                ok("")
            }
            BackendCall::PushRef { remote, notes_ref } => self.push_ref(repo, remote, notes_ref),
            BackendCall::MergeRef {
                notes_ref,
                strategy,
                source,
            } => self.merge(repo, notes_ref, *strategy, source),
            BackendCall::AbortMerge { notes_ref } => {
                if let Some(r) = self.repos.get_mut(repo) {
                    r.merging.remove(notes_ref);
                }
                ok("")
            }
            BackendCall::UpdateRef { name, hash } => {
                if !self.notes_commits.contains_key(hash) && !self.commits.contains_key(hash) {
                    return fail(
                        128,
                        format!("fatal: update_ref failed for ref '{}': invalid object\n", name),
                    );
                }
                self.set_ref(repo, name, hash.clone());
                ok("")
            }
            BackendCall::DeleteRef { name } => {
                if let Some(r) = self.repos.get_mut(repo) {
                    r.refs.remove(name);
                }
                ok("")
            }
            BackendCall::RefExists { name } => {
                if self.ref_of(repo, name).is_some() {
                    ok("")
                } else {
                    fail(1, "")
                }
            }
            BackendCall::InitializeEmptyRef { name } => {
                let id = self.allocate_id();
                self.notes_commits.insert(id.clone(), NotesCommit::default());
                self.set_ref(repo, name, id);
                ok("")
            }
        }
    }

    fn ref_of(&self, repo: &str, name: &str) -> Option<String> {
        self.repos.get(repo).and_then(|r| r.refs.get(name).cloned())
    }

    fn set_ref(&mut self, repo: &str, name: &str, target: String) {
        if let Some(r) = self.repos.get_mut(repo) {
            r.refs.insert(name.to_string(), target);
        }
    }

    fn remote_repo(&self, repo: &str, remote: &str) -> Option<String> {
        let target = self.repos.get(repo)?.remotes.get(remote)?;
        self.repos.contains_key(target).then(|| target.clone())
    }

    fn notes_at(&self, repo: &str, notes_ref: &str) -> BTreeMap<String, String> {
        self.ref_of(repo, notes_ref)
            .and_then(|id| self.notes_commits.get(&id))
            .map(|c| c.notes.clone())
            .unwrap_or_default()
    }

    fn commit_notes(&mut self, repo: &str, notes_ref: &str, notes: BTreeMap<String, String>) {
        let parents = self.ref_of(repo, notes_ref).into_iter().collect();
        let id = self.allocate_id();
        self.notes_commits
            .insert(id.clone(), NotesCommit { parents, notes });
        self.set_ref(repo, notes_ref, id);
    }

    /// Resolve refs, `HEAD`, full or abbreviated hashes, with `~N` / `^` suffixes
    fn resolve(&self, repo: &str, revision: &str) -> Option<String> {
        let (base, steps) = split_ancestry(revision)?;
        let r = self.repos.get(repo)?;

        let mut current = if base == "HEAD" {
            r.head.clone()?
        } else if let Some(target) = r.refs.get(base) {
            target.clone()
        } else if r.known.contains(base) {
            base.to_string()
        } else if base.len() >= 4 && base.chars().all(|c| c.is_ascii_hexdigit()) {
            let mut matches = r.known.iter().filter(|k| k.starts_with(base));
            let first = matches.next()?.clone();
            if matches.next().is_some() {
                return None;
            }
            first
        } else {
            return None;
        };

        for _ in 0..steps {
            current = self.commits.get(&current)?.parent.clone()?;
        }
        Some(current)
    }

    /// Like [`World::resolve`] but only history commits qualify
    fn resolve_commit(&self, repo: &str, revision: &str) -> Option<String> {
        let revision = if revision.is_empty() { "HEAD" } else { revision };
        self.resolve(repo, revision)
            .filter(|hash| self.commits.contains_key(hash))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut queue = VecDeque::from([descendant.to_string()]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if id == ancestor {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(c) = self.notes_commits.get(&id) {
                queue.extend(c.parents.iter().cloned());
            }
        }
        false
    }

    fn fetch_ref(
        &mut self,
        repo: &str,
        remote: &str,
        source: &str,
        destination: &str,
        force: bool,
    ) -> CommandOutput {
        let Some(remote_repo) = self.remote_repo(repo, remote) else {
            return unknown_remote(remote);
        };
        let Some(incoming) = self.ref_of(&remote_repo, source) else {
            return fail(128, format!("fatal: couldn't find remote ref {}\n", source));
        };
        if let Some(current) = self.ref_of(repo, destination) {
            if !force && !self.is_ancestor(&current, &incoming) {
                return fail(
                    1,
                    format!(
                        " ! [rejected]        {} -> {}  (non-fast-forward)\n",
                        source, destination
                    ),
                );
            }
        }
        self.set_ref(repo, destination, incoming);
        ok("")
    }

    fn push_ref(&mut self, repo: &str, remote: &str, notes_ref: &str) -> CommandOutput {
        let Some(remote_repo) = self.remote_repo(repo, remote) else {
            return unknown_remote(remote);
        };
        let Some(local) = self.ref_of(repo, notes_ref) else {
            return fail(
                1,
                format!("error: src refspec {} does not match any\n", notes_ref),
            );
        };
        match self.ref_of(&remote_repo, notes_ref) {
            Some(current) if current == local => ok("Everything up-to-date\n"),
            Some(current) if !self.is_ancestor(&current, &local) => fail(
                1,
                format!(
                    "To {remote}\n ! [rejected]        {r} -> {r} (fetch first)\n\
                     error: failed to push some refs to '{remote}'\n",
                    remote = remote,
                    r = notes_ref
                ),
            ),
            _ => {
                self.set_ref(&remote_repo, notes_ref, local);
                ok("")
            }
        }
    }

    fn merge(
        &mut self,
        repo: &str,
        notes_ref: &str,
        strategy: MergeStrategy,
        source: &str,
    ) -> CommandOutput {
        let Some(theirs) = self.ref_of(repo, source) else {
            return fail(
                128,
                format!("fatal: failed to resolve remote notes ref '{}'\n", source),
            );
        };
        let Some(ours) = self.ref_of(repo, notes_ref) else {
            self.set_ref(repo, notes_ref, theirs);
            return ok("Fast-forward\n");
        };
        if self.is_ancestor(&theirs, &ours) {
            return ok("Already up to date.\n");
        }
        if self.is_ancestor(&ours, &theirs) {
            self.set_ref(repo, notes_ref, theirs);
            return ok("Fast-forward\n");
        }

        let MergeStrategy::CatSortUniq = strategy;
        let mut merged = self.notes_at(repo, notes_ref);
        let incoming = self
            .notes_commits
            .get(&theirs)
            .map(|c| c.notes.clone())
            .unwrap_or_default();
        for (commit, content) in incoming {
            let combined = match merged.get(&commit) {
                Some(existing) if *existing != content => cat_sort_uniq(existing, &content),
                _ => content,
            };
            merged.insert(commit, combined);
        }

        let id = self.allocate_id();
        self.notes_commits.insert(
            id.clone(),
            NotesCommit {
                parents: vec![ours, theirs],
                notes: merged,
            },
        );
        self.set_ref(repo, notes_ref, id);
        ok("")
    }
}

/// Split `HEAD~2` into (`HEAD`, 2); `abc^^` into (`abc`, 2)
fn split_ancestry(revision: &str) -> Option<(&str, usize)> {
    let cut = revision
        .find(|c| c == '~' || c == '^')
        .unwrap_or(revision.len());
    let (base, mut rest) = revision.split_at(cut);
    if base.is_empty() {
        return None;
    }
    let mut steps = 0;
    while !rest.is_empty() {
        let (caret, after) = if let Some(after) = rest.strip_prefix('^') {
            (true, after)
        } else {
            (false, rest.strip_prefix('~')?)
        };
        rest = after;
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let count = if digits == 0 {
            1
        } else {
            rest[..digits].parse().ok()?
        };
        if caret && digits > 0 && count != 1 {
            // Second parents do not exist in this model
            return None;
        }
        steps += count;
        rest = &rest[digits..];
    }
    Some((base, steps))
}
