//! Config command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use gitnotes_core::Config;

use crate::output::{Output, OutputFormat};

/// Load from `config_path` if given, otherwise from the default location
pub fn load(config_path: Option<&Path>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    config.context("Failed to load configuration")
}

/// Show current configuration
pub fn show(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config = load(config_path)?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!(config));
        }
        OutputFormat::Quiet => {
            println!("{}", effective_path(config_path).display());
        }
        OutputFormat::Human => {
            let or_unset = |value: Option<String>| value.unwrap_or_else(|| "(not set)".to_string());
            println!("Configuration:");
            println!(
                "  repo_path:            {}",
                or_unset(config.repo_path.as_ref().map(|p| p.display().to_string()))
            );
            println!("  git_binary:           {}", config.git_binary);
            println!(
                "  namespace:            {}",
                if config.namespace.is_empty() {
                    "(default)"
                } else {
                    config.namespace.as_str()
                }
            );
            println!("  remote:               {}", config.remote);
            println!("  push_attempts:        {}", config.push_attempts);
            println!("  push_backoff_ms:      {}", config.push_backoff_ms);
            println!("  bulk_concurrency:     {}", config.bulk_concurrency);
            println!(
                "  command_timeout_secs: {}",
                or_unset(config.command_timeout_secs.map(|s| s.to_string()))
            );
            println!("  verify_refs:          {}", config.verify_refs);
            println!("  author_name:          {}", or_unset(config.author_name.clone()));
            println!("  author_email:         {}", or_unset(config.author_email.clone()));
            println!();
            println!("Config file: {}", effective_path(config_path).display());
        }
    }

    Ok(())
}

/// Set a configuration value and save it
pub fn set(key: &str, value: &str, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config = load(config_path)?;
    config
        .set(key, value)
        .context("Valid keys: repo_path, git_binary, namespace, remote, push_attempts, \
                  push_backoff_ms, bulk_concurrency, command_timeout_secs, verify_refs, \
                  author_name, author_email")?;

    let save_path = effective_path(config_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

fn effective_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set("push_attempts", "5", Some(&path), &output).unwrap();
        set("author_name", "Notes Bot", Some(&path), &output).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("push_attempts = 5"));
        assert!(saved.contains("author_name = \"Notes Bot\""));
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        assert!(set("no_such_key", "x", Some(&path), &output).is_err());
        assert!(set("push_attempts", "many", Some(&path), &output).is_err());
        assert!(!path.exists());
    }
}
