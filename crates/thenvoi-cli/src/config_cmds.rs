//! `thenvoi config ...` commands: manage stored agent credentials.

use std::io::IsTerminal;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use thenvoi_core::credentials::{CredentialError, CredentialStore, StoredRecord};

use crate::error::CliError;
use crate::output::{self, OutputFormat, Table, mask_api_key, mask_uuid};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Save credentials for an agent
    Set {
        /// Agent name
        name: String,
        /// Agent UUID from the platform
        #[arg(short = 'i', long)]
        agent_id: String,
        /// Agent API key
        #[arg(short = 'k', long)]
        api_key: String,
        /// Overwrite an existing agent without asking
        #[arg(short, long)]
        force: bool,
    },
    /// List configured agents
    List,
    /// Show one agent's configuration
    Show {
        /// Agent name
        name: String,
        /// Print the full API key
        #[arg(short, long)]
        reveal: bool,
    },
    /// Delete an agent's configuration
    Delete {
        /// Agent name
        name: String,
        /// Delete without asking
        #[arg(short, long)]
        force: bool,
    },
    /// Check stored records for missing or malformed fields
    Validate {
        /// Agent to validate (all agents if omitted)
        name: Option<String>,
    },
    /// Print the credential store path
    Path,
}

pub fn run_config_command(
    command: ConfigCommands,
    store: &CredentialStore,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Set {
            name,
            agent_id,
            api_key,
            force,
        } => cmd_set(store, &name, &agent_id, &api_key, force),
        ConfigCommands::List => cmd_list(store, format),
        ConfigCommands::Show { name, reveal } => cmd_show(store, &name, reveal, format),
        ConfigCommands::Delete { name, force } => cmd_delete(store, &name, force),
        ConfigCommands::Validate { name } => cmd_validate(store, name.as_deref()),
        ConfigCommands::Path => cmd_path(store),
    }
}

/// Ask a yes/no question on the terminal, defaulting to no.
///
/// Without a terminal the answer is "no" and the caller is told to pass
/// `--force` instead.
fn confirm(prompt: &str) -> Result<()> {
    if !std::io::stdin().is_terminal() {
        return Err(CliError::Aborted {
            hint: Some("Not running interactively; re-run with --force.".to_string()),
        }
        .into());
    }
    let answer = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| match e {
            dialoguer::Error::IO(io) if io.kind() == std::io::ErrorKind::Interrupted => {
                anyhow::Error::new(CliError::Interrupted)
            }
            other => anyhow::Error::new(other),
        })?;
    if answer {
        Ok(())
    } else {
        Err(CliError::Aborted { hint: None }.into())
    }
}

fn warn_permissions(store: &CredentialStore) {
    if let Some(warning) = store.permission_warning() {
        eprintln!("Warning: {warning}");
    }
}

fn cmd_set(
    store: &CredentialStore,
    name: &str,
    agent_id: &str,
    api_key: &str,
    force: bool,
) -> Result<()> {
    if !force && store.list()?.iter().any(|n| n == name) {
        confirm(&format!("Agent '{name}' already exists. Overwrite?"))?;
    }

    let is_new = store.save(name, agent_id, api_key, true)?;
    let action = if is_new { "Created" } else { "Updated" };
    println!("{action} configuration for '{name}'");
    warn_permissions(store);
    Ok(())
}

#[derive(Serialize)]
struct AgentSummary {
    name: String,
    agent_id: Option<String>,
    api_key_masked: String,
}

/// Stored fields for `name`, tolerating a malformed record.
fn details_or_blank(store: &CredentialStore, name: &str) -> Result<StoredRecord> {
    match store.get_details(name) {
        Ok(record) => Ok(record),
        Err(CredentialError::InvalidRecord { .. }) => Ok(StoredRecord::default()),
        Err(e) => Err(e.into()),
    }
}

fn cmd_list(store: &CredentialStore, format: OutputFormat) -> Result<()> {
    let names = store.list()?;

    if names.is_empty() {
        if format == OutputFormat::Json {
            println!("[]");
        } else {
            println!("No agents configured.");
            println!("Add one with: thenvoi config set <name> --agent-id <id> --api-key <key>");
        }
        return Ok(());
    }

    let mut agents = Vec::with_capacity(names.len());
    for name in names {
        let record = details_or_blank(store, &name)?;
        agents.push(AgentSummary {
            api_key_masked: mask_api_key(record.api_key.as_deref().unwrap_or("")),
            agent_id: record.agent_id,
            name,
        });
    }

    match format {
        OutputFormat::Json => println!("{}", output::to_json(&agents)?),
        OutputFormat::Table => {
            let mut table = Table::new(["NAME", "AGENT ID", "API KEY"]);
            for agent in &agents {
                table.row([
                    agent.name.clone(),
                    mask_uuid(agent.agent_id.as_deref().unwrap_or("")),
                    agent.api_key_masked.clone(),
                ]);
            }
            print!("{}", table.render());
        }
        OutputFormat::Plain => {
            for agent in &agents {
                println!(
                    "{}: {} | {}",
                    agent.name,
                    mask_uuid(agent.agent_id.as_deref().unwrap_or("")),
                    agent.api_key_masked
                );
            }
        }
    }
    Ok(())
}

fn cmd_show(store: &CredentialStore, name: &str, reveal: bool, format: OutputFormat) -> Result<()> {
    let record = store.get_details(name)?;
    let api_key = record.api_key.unwrap_or_default();
    let displayed_key = if reveal {
        api_key
    } else {
        mask_api_key(&api_key)
    };
    let agent_id = record.agent_id.unwrap_or_default();

    if format == OutputFormat::Json {
        let json = serde_json::json!({
            "name": name,
            "agent_id": agent_id,
            "api_key": displayed_key,
        });
        println!("{}", output::to_json(&json)?);
        return Ok(());
    }

    println!("Agent:    {name}");
    println!("Agent ID: {agent_id}");
    println!("API Key:  {displayed_key}");
    if !reveal {
        println!();
        println!("Use --reveal to show full API key");
    }
    Ok(())
}

fn cmd_delete(store: &CredentialStore, name: &str, force: bool) -> Result<()> {
    if !store.list()?.iter().any(|n| n == name) {
        return Err(CredentialError::NotFound {
            name: name.to_string(),
        }
        .into());
    }
    if !force {
        confirm(&format!("Delete configuration for '{name}'?"))?;
    }

    if store.delete(name)? {
        println!("Deleted configuration for '{name}'");
        Ok(())
    } else {
        Err(CredentialError::NotFound {
            name: name.to_string(),
        }
        .into())
    }
}

fn cmd_validate(store: &CredentialStore, name: Option<&str>) -> Result<()> {
    let errors = store.validate(name)?;

    if !errors.is_empty() {
        println!("Validation errors:");
        for error in &errors {
            println!("  - {error}");
        }
        return Err(CliError::ValidationFailed {
            count: errors.len(),
        }
        .into());
    }

    match name {
        Some(name) => println!("Configuration valid for agent '{name}'"),
        None => println!("Configuration valid for all agents"),
    }
    warn_permissions(store);
    Ok(())
}

fn cmd_path(store: &CredentialStore) -> Result<()> {
    let path = std::path::absolute(store.path())?;
    println!("{}", path.display());

    if !store.exists() {
        println!("File exists: No");
        return Ok(());
    }
    println!("File exists: Yes");
    if store.check_permissions() {
        println!("Permissions: Secure");
    } else {
        println!("Permissions: Insecure (recommend chmod 600)");
    }
    Ok(())
}
