//! Sync command handlers

use anyhow::{Context, Result};

use gitnotes_core::{FetchOutcome, Namespace, Notes};

use crate::output::Output;

/// Replace local notes with the remote's copy
pub async fn fetch(
    notes: &impl Notes,
    namespace: &Namespace,
    remote: &str,
    output: &Output,
) -> Result<()> {
    output.message(&format!("Fetching {} from {}...", namespace, remote));

    let outcome = notes
        .fetch_notes(namespace, remote)
        .await
        .with_context(|| format!("Failed to fetch {} from {}", namespace, remote))?;

    match outcome {
        FetchOutcome::Updated => output.success(&format!("Fetched {}", namespace)),
        FetchOutcome::NoRemoteNotes => {
            output.success(&format!("{} has no notes in {}", remote, namespace))
        }
    }
    Ok(())
}

/// Merge in the remote's notes and push the result
pub async fn push(
    notes: &impl Notes,
    namespace: &Namespace,
    remote: &str,
    output: &Output,
) -> Result<()> {
    output.message(&format!("Pushing {} to {}...", namespace, remote));

    notes
        .push_notes(namespace, remote)
        .await
        .with_context(|| format!("Failed to push {} to {}", namespace, remote))?;

    output.success(&format!("Pushed {} to {}", namespace, remote));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use gitnotes_core::{MemoryHost, NotesError, NotesStore};

    #[tokio::test]
    async fn test_push_then_fetch_elsewhere() {
        let host = MemoryHost::new();
        host.init_repo("origin");
        let head = host.commit("origin", 1_700_000_000);
        let ns = Namespace::from("ci");
        let output = Output::new(OutputFormat::Quiet);

        let writer = NotesStore::new(host.clone_repo("origin", "writer"));
        writer.set(&ns, &head, "green").await.unwrap();
        push(&writer, &ns, "origin", &output).await.unwrap();

        let reader = NotesStore::new(host.clone_repo("origin", "reader"));
        fetch(&reader, &ns, "origin", &output).await.unwrap();
        assert_eq!(reader.get(&ns, &head).await.unwrap(), "green");
    }

    #[tokio::test]
    async fn test_push_error_keeps_notes_error() {
        let host = MemoryHost::new();
        host.init_repo("origin");
        host.commit("origin", 1);
        let store = NotesStore::new(host.clone_repo("origin", "local"));
        let output = Output::new(OutputFormat::Quiet);

        let err = push(&store, &Namespace::default(), "", &output)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NotesError>(),
            Some(NotesError::InvalidRemote { .. })
        ));
    }
}
