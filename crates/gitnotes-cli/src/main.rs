//! gitnotes CLI
//!
//! Command-line interface for reading, writing and sharing git notes.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gitnotes_core::{GitBackend, Namespace, NotesError, NotesStore, Timed};

mod commands;
mod output;

use commands::notes::Content;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "gitnotes")]
#[command(about = "Namespaced annotations on git commits, shared through git notes")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Namespace to operate on (default from config, else refs/notes/commits)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Repository to operate on (default: current directory)
    #[arg(short = 'C', long, global = true)]
    repo: Option<PathBuf>,

    /// Config file to use instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the note on a commit
    Get {
        /// Commit (default: HEAD)
        #[arg(default_value = "")]
        commit: String,
    },
    /// Attach a note to a commit, replacing any existing one
    Set {
        /// Commit to annotate
        commit: String,
        /// Note content (reads --file or stdin when omitted)
        value: Option<String>,
        /// Read the note from a file ("-" for stdin)
        #[arg(short, long, conflicts_with = "value")]
        file: Option<PathBuf>,
    },
    /// Remove the note on a commit
    #[command(alias = "remove")]
    Rm {
        /// Commit (default: HEAD)
        #[arg(default_value = "")]
        commit: String,
    },
    /// List annotated commits, newest first
    #[command(alias = "ls")]
    List,
    /// Print the notes on several commits
    GetMany {
        /// Commits to read
        #[arg(required = true)]
        commits: Vec<String>,
    },
    /// Replace local notes with the remote's copy
    Fetch {
        /// Remote (default from config)
        remote: Option<String>,
    },
    /// Merge in remote notes and push
    Push {
        /// Remote (default from config)
        remote: Option<String>,
        /// Attempts before giving up on concurrent writers
        #[arg(long)]
        attempts: Option<u32>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value (empty string clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let result = run(cli, &output).await;
    if let Err(ref err) = result {
        let hint = err
            .downcast_ref::<NotesError>()
            .and_then(NotesError::recovery_suggestion);
        if let Some(hint) = hint {
            if !output.is_quiet() {
                eprintln!("hint: {}", hint);
            }
        }
    }
    result
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    let config_path = cli.config.as_deref();

    // Config commands don't need a repository
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, output);
    }

    let mut config = commands::config::load(config_path)?;
    if let Some(repo) = cli.repo {
        config.repo_path = Some(repo);
    }
    if let Commands::Push {
        attempts: Some(attempts),
        ..
    } = &cli.command
    {
        config.push_attempts = *attempts;
    }

    let namespace = Namespace::new(cli.namespace.unwrap_or_else(|| config.namespace.clone()));
    let remote = config.remote.clone();
    tracing::debug!("Using repository {:?}, namespace {}", config.repo_path, namespace);
    let notes = Timed::new(NotesStore::with_config(GitBackend::from_config(&config), config));

    match cli.command {
        Commands::Get { commit } => {
            commands::notes::get(&notes, &namespace, &commit, output).await
        }
        Commands::Set {
            commit,
            value,
            file,
        } => {
            let content = Content::from_args(value, file);
            commands::notes::set(&notes, &namespace, &commit, content, output).await
        }
        Commands::Rm { commit } => {
            commands::notes::remove(&notes, &namespace, &commit, output).await
        }
        Commands::List => commands::notes::list(&notes, &namespace, output).await,
        Commands::GetMany { commits } => {
            commands::notes::get_many(&notes, &namespace, &commits, output).await
        }
        Commands::Fetch { remote: name } => {
            let name = name.unwrap_or(remote);
            commands::sync::fetch(&notes, &namespace, &name, output).await
        }
        Commands::Push { remote: name, .. } => {
            let name = name.unwrap_or(remote);
            commands::sync::push(&notes, &namespace, &name, output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&std::path::Path>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(&key, &value, config_path, output)
        }
    }
}

/// Log to stderr, filtered by GITNOTES_LOG or RUST_LOG (default: warn)
fn init_logging() {
    let env_filter = EnvFilter::try_from_env("GITNOTES_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_with_file() {
        let cli = Cli::try_parse_from([
            "gitnotes", "--namespace", "review", "set", "HEAD~1", "--file", "note.txt",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("review"));
        match cli.command {
            Commands::Set {
                commit,
                value,
                file,
            } => {
                assert_eq!(commit, "HEAD~1");
                assert!(value.is_none());
                assert_eq!(file, Some(PathBuf::from("note.txt")));
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn test_value_and_file_conflict() {
        let parsed = Cli::try_parse_from(["gitnotes", "set", "HEAD", "text", "--file", "x"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_get_defaults_to_head() {
        let cli = Cli::try_parse_from(["gitnotes", "get", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Get { ref commit } if commit.is_empty()));
    }

    #[test]
    fn test_push_attempts_flag() {
        let cli = Cli::try_parse_from(["gitnotes", "push", "upstream", "--attempts", "5"]).unwrap();
        match cli.command {
            Commands::Push { remote, attempts } => {
                assert_eq!(remote.as_deref(), Some("upstream"));
                assert_eq!(attempts, Some(5));
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_get_many_requires_commits() {
        assert!(Cli::try_parse_from(["gitnotes", "get-many"]).is_err());
    }
}
