//! Note command handlers

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};

use gitnotes_core::{Namespace, Notes};

use crate::output::Output;

/// Print the note on a commit
pub async fn get(
    notes: &impl Notes,
    namespace: &Namespace,
    commit: &str,
    output: &Output,
) -> Result<()> {
    let content = notes
        .get(namespace, commit)
        .await
        .with_context(|| format!("Failed to read note in {}", namespace))?;
    output.print_note(commit, &content);
    Ok(())
}

/// Where the content of `set` comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Value(String),
    File(PathBuf),
    Stdin,
}

impl Content {
    pub fn from_args(value: Option<String>, file: Option<PathBuf>) -> Self {
        match (value, file) {
            (Some(value), _) => Content::Value(value),
            (None, Some(path)) if path.as_os_str() == "-" => Content::Stdin,
            (None, Some(path)) => Content::File(path),
            (None, None) => Content::Stdin,
        }
    }

    fn read(self) -> Result<String> {
        match self {
            Content::Value(value) => Ok(value),
            Content::File(path) => std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display())),
            Content::Stdin => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read note from stdin")?;
                Ok(buf)
            }
        }
    }
}

/// Attach content to a commit, replacing any existing note
pub async fn set(
    notes: &impl Notes,
    namespace: &Namespace,
    commit: &str,
    content: Content,
    output: &Output,
) -> Result<()> {
    let content = content.read()?;
    notes
        .set(namespace, commit, &content)
        .await
        .with_context(|| format!("Failed to write note in {}", namespace))?;
    output.success(&format!("Note set on {} ({} bytes)", display_ref(commit), content.len()));
    Ok(())
}

/// Remove the note on a commit
pub async fn remove(
    notes: &impl Notes,
    namespace: &Namespace,
    commit: &str,
    output: &Output,
) -> Result<()> {
    notes
        .delete(namespace, commit)
        .await
        .with_context(|| format!("Failed to remove note in {}", namespace))?;
    output.success(&format!("Note removed from {}", display_ref(commit)));
    Ok(())
}

/// List annotated commits, newest first
pub async fn list(notes: &impl Notes, namespace: &Namespace, output: &Output) -> Result<()> {
    let entries = notes
        .list_entries(namespace)
        .await
        .with_context(|| format!("Failed to list notes in {}", namespace))?;
    output.print_entries(&entries);
    Ok(())
}

/// Read several notes at once; fails only if every ref failed
pub async fn get_many(
    notes: &impl Notes,
    namespace: &Namespace,
    commits: &[String],
    output: &Output,
) -> Result<()> {
    let bulk = notes.get_many(namespace, commits).await;
    output.print_bulk(commits, &bulk);
    if !commits.is_empty() && bulk.notes.is_empty() {
        anyhow::bail!("No notes could be read from {}", namespace);
    }
    Ok(())
}

fn display_ref(commit: &str) -> &str {
    if commit.is_empty() {
        "HEAD"
    } else {
        commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use gitnotes_core::{MemoryHost, NotesStore};

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    #[test]
    fn test_content_from_args() {
        assert_eq!(
            Content::from_args(Some("v".into()), None),
            Content::Value("v".into())
        );
        assert_eq!(Content::from_args(None, Some("-".into())), Content::Stdin);
        assert_eq!(
            Content::from_args(None, Some("note.txt".into())),
            Content::File("note.txt".into())
        );
        assert_eq!(Content::from_args(None, None), Content::Stdin);
    }

    #[tokio::test]
    async fn test_set_from_file_then_get() {
        let host = MemoryHost::new();
        let backend = host.init_repo("repo");
        let head = host.commit("repo", 1_700_000_000);
        let store = NotesStore::new(backend);
        let ns = Namespace::from("cli");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "from a file\n").unwrap();

        set(&store, &ns, "", Content::File(path), &quiet())
            .await
            .unwrap();
        assert_eq!(store.get(&ns, &head).await.unwrap(), "from a file\n");

        get(&store, &ns, &head, &quiet()).await.unwrap();
        list(&store, &ns, &quiet()).await.unwrap();
        remove(&store, &ns, &head, &quiet()).await.unwrap();
        assert!(get(&store, &ns, &head, &quiet()).await.is_err());
    }

    #[tokio::test]
    async fn test_get_many_fails_when_nothing_read() {
        let host = MemoryHost::new();
        let backend = host.init_repo("repo");
        host.commit("repo", 1_700_000_000);
        let store = NotesStore::new(backend);
        let ns = Namespace::default();

        let refs = vec!["HEAD".to_string(), "-bad".to_string()];
        assert!(get_many(&store, &ns, &refs, &quiet()).await.is_err());

        store.set(&ns, "HEAD", "x").await.unwrap();
        get_many(&store, &ns, &refs, &quiet()).await.unwrap();
    }
}
