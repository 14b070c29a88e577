//! `thenvoi adapters ...` commands: discover adapters and their readiness.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use thenvoi_core::adapter::{AdapterCatalog, AdapterKind};

use crate::output::{self, OutputFormat, Table};

#[derive(Subcommand)]
pub enum AdapterCommands {
    /// List every adapter and whether it is ready to run
    List,
    /// Show dependencies and environment for one adapter
    Info {
        /// Adapter name
        name: String,
    },
}

pub fn run_adapters_command(
    command: AdapterCommands,
    catalog: &AdapterCatalog,
    format: OutputFormat,
) -> Result<()> {
    match command {
        AdapterCommands::List => cmd_list(catalog, format),
        AdapterCommands::Info { name } => cmd_info(catalog, &name, format),
    }
}

#[derive(Serialize)]
struct AdapterRow {
    name: &'static str,
    description: &'static str,
    available: bool,
    default_model: &'static str,
}

fn cmd_list(catalog: &AdapterCatalog, format: OutputFormat) -> Result<()> {
    let rows: Vec<AdapterRow> = catalog
        .list()
        .iter()
        .map(|&kind| {
            let info = kind.info();
            AdapterRow {
                name: info.name,
                description: info.description,
                available: catalog.is_available(kind),
                default_model: info.default_model.unwrap_or("-"),
            }
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", output::to_json(&rows)?),
        OutputFormat::Table => {
            let mut table = Table::new(["NAME", "DESCRIPTION", "READY", "DEFAULT MODEL"]);
            for row in &rows {
                table.row([
                    row.name,
                    row.description,
                    if row.available { "yes" } else { "no" },
                    row.default_model,
                ]);
            }
            print!("{}", table.render());
        }
        OutputFormat::Plain => {
            for row in &rows {
                let status = if row.available { "ready" } else { "missing deps" };
                println!("{}: {} ({status})", row.name, row.description);
            }
        }
    }
    Ok(())
}

fn env_is_set(var: &str) -> bool {
    std::env::var_os(var).is_some_and(|v| !v.is_empty())
}

fn cmd_info(catalog: &AdapterCatalog, name: &str, format: OutputFormat) -> Result<()> {
    let kind: AdapterKind = name.parse()?;
    let info = kind.info();
    let missing = catalog.missing_packages(kind);

    if format == OutputFormat::Json {
        let packages: Vec<_> = info
            .required_packages
            .iter()
            .map(|pkg| serde_json::json!({"name": pkg, "installed": !missing.contains(pkg)}))
            .collect();
        let env: Vec<_> = info
            .env_vars
            .iter()
            .map(|var| serde_json::json!({"name": var, "set": env_is_set(var)}))
            .collect();
        let json = serde_json::json!({
            "name": info.name,
            "description": info.description,
            "available": missing.is_empty(),
            "default_model": info.default_model,
            "required_packages": packages,
            "env_vars": env,
        });
        println!("{}", output::to_json(&json)?);
        return Ok(());
    }

    println!("{}", info.name);
    println!("  {}", info.description);
    println!();
    if missing.is_empty() {
        println!("Status: Ready");
    } else {
        println!("Status: Missing dependencies");
    }
    if let Some(model) = info.default_model {
        println!("Default Model: {model}");
    }

    if !info.required_packages.is_empty() {
        println!();
        println!("Required Dependencies:");
        for pkg in info.required_packages {
            let state = if missing.contains(pkg) { "Missing" } else { "Installed" };
            println!("  {pkg}: {state}");
        }
    }

    if !info.env_vars.is_empty() {
        println!();
        println!("Required Environment Variables:");
        for var in info.env_vars {
            let state = if env_is_set(var) { "Set" } else { "Not set" };
            println!("  {var}: {state}");
        }
    }

    if !missing.is_empty() {
        println!();
        println!("Install dependencies with:");
        println!("  pip install thenvoi-cli[{}]", info.name);
    }
    Ok(())
}
