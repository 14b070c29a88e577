//! `thenvoi status` and `thenvoi stop`: inspect and stop supervised agents.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use thenvoi_core::process::{AgentProcess, ProcessError, ProcessRegistry};

use crate::error::CliError;
use crate::output::{self, OutputFormat, Table, format_uptime};

#[derive(Serialize)]
struct StatusRow<'a> {
    name: &'a str,
    pid: u32,
    status: &'static str,
    adapter: Option<&'a str>,
    started_at: String,
    uptime_seconds: u64,
}

impl<'a> StatusRow<'a> {
    fn new(agent: &'a AgentProcess, uptime: Duration) -> Self {
        Self {
            name: &agent.name,
            pid: agent.pid,
            status: "running",
            adapter: agent.adapter.as_deref(),
            started_at: agent.started_at.to_rfc3339(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Run the status command.
///
/// With a name, shows that agent (an error if it is not running). Without
/// one, lists every live agent. Dead entries are purged while looking.
pub fn run_status(
    registry: &ProcessRegistry,
    name: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    match name {
        Some(name) => {
            let agent = registry
                .get_status(name)
                .ok_or_else(|| ProcessError::NotRunning {
                    name: name.to_string(),
                })?;
            show_agent(&agent, format)
        }
        None => {
            let mut agents = registry.list_running()?;
            agents.sort_by(|a, b| a.name.cmp(&b.name));
            show_fleet(&agents, format)
        }
    }
}

fn show_agent(agent: &AgentProcess, format: OutputFormat) -> Result<()> {
    let uptime = agent.uptime(Utc::now());
    match format {
        OutputFormat::Json => println!("{}", output::to_json(&StatusRow::new(agent, uptime))?),
        OutputFormat::Table => {
            println!("Agent:   {}", agent.name);
            println!("Status:  running");
            println!("PID:     {}", agent.pid);
            println!("Adapter: {}", agent.adapter.as_deref().unwrap_or("unknown"));
            println!(
                "Started: {}",
                agent.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("Uptime:  {}", format_uptime(uptime));
        }
        OutputFormat::Plain => println!(
            "{}: running (PID {}, uptime {})",
            agent.name,
            agent.pid,
            format_uptime(uptime)
        ),
    }
    Ok(())
}

fn show_fleet(agents: &[AgentProcess], format: OutputFormat) -> Result<()> {
    if agents.is_empty() {
        if format == OutputFormat::Json {
            println!("[]");
        } else {
            println!("No agents running");
            println!("Start one with: thenvoi run <agent-name>");
        }
        return Ok(());
    }

    let now = Utc::now();
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = agents
                .iter()
                .map(|agent| StatusRow::new(agent, agent.uptime(now)))
                .collect();
            println!("{}", output::to_json(&rows)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new(["NAME", "STATUS", "PID", "ADAPTER", "UPTIME"]);
            for agent in agents {
                table.row([
                    agent.name.clone(),
                    "running".to_string(),
                    agent.pid.to_string(),
                    agent.adapter.clone().unwrap_or_else(|| "unknown".to_string()),
                    format_uptime(agent.uptime(now)),
                ]);
            }
            print!("{}", table.render());
        }
        OutputFormat::Plain => {
            for agent in agents {
                println!(
                    "{}: running (PID {}, uptime {})",
                    agent.name,
                    agent.pid,
                    format_uptime(agent.uptime(now))
                );
            }
        }
    }
    Ok(())
}

/// Run the stop command.
///
/// The graceful wait blocks, so the registry work runs on the blocking pool.
pub async fn run_stop(
    registry: &ProcessRegistry,
    name: Option<String>,
    all: bool,
    force: bool,
    timeout: Duration,
) -> Result<()> {
    let registry = registry.clone();

    if all {
        let count = tokio::task::spawn_blocking(move || registry.stop_all(force, timeout))
            .await
            .context("stop task panicked")??;
        if count > 0 {
            println!("Stopped {count} agent(s)");
        } else {
            println!("No agents were running");
        }
        return Ok(());
    }

    let Some(name) = name else {
        return Err(CliError::usage(
            "no agent specified",
            "Specify an agent name or use --all",
        )
        .into());
    };

    if !registry.is_running(&name) {
        return Err(ProcessError::NotRunning { name }.into());
    }

    let action = if force { "Force stopping" } else { "Stopping" };
    println!("{action} agent '{name}'...");

    let stopped = {
        let name = name.clone();
        tokio::task::spawn_blocking(move || registry.stop(&name, force, timeout))
            .await
            .context("stop task panicked")??
    };

    if stopped {
        println!("Stopped agent '{name}'");
    } else {
        // Exited between the liveness check and the stop.
        println!("Agent '{name}' had already exited");
    }
    Ok(())
}
